use rusqlite::types::Value;
use serde_json::Value as JsonValue;

pub struct Utils {}

impl Utils {
    /// Quotes an SQLite identifier (table or column name), doubling any
    /// embedded double quotes.
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Text form of a stored value, or `None` for NULL.
    pub fn value_to_text(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(Self::format_real(*f)),
            Value::Text(s) => Some(s.clone()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    pub fn value_to_json(value: &Value) -> JsonValue {
        match value {
            Value::Null => JsonValue::Null,
            Value::Integer(i) => JsonValue::from(*i),
            Value::Real(f) => JsonValue::from(*f),
            Value::Text(s) => JsonValue::from(s.as_str()),
            Value::Blob(b) => JsonValue::from(format!("<blob {} bytes>", b.len())),
        }
    }

    /// Display form used by the explore report: NULL as `None`, long text
    /// truncated to `max_chars` characters followed by `...`.
    pub fn value_for_display(value: &Value, max_chars: usize) -> String {
        match Self::value_to_text(value) {
            None => "None".to_string(),
            Some(text) => Self::truncate_chars(&text, max_chars),
        }
    }

    /// Whole reals keep a trailing `.0` so they read differently from integers.
    pub fn format_real(value: f64) -> String {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
            format!("{:.1}", value)
        } else {
            value.to_string()
        }
    }

    /// Integer with `,` between every group of three digits.
    pub fn format_thousands(value: i64) -> String {
        let digits = value.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
        if value < 0 {
            grouped.push('-');
        }
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        grouped
    }

    pub fn truncate_chars(text: &str, max_chars: usize) -> String {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        }
    }

    /// Escapes `%`, `_` and the escape character itself so `pattern` can be
    /// used as a literal inside `LIKE ... ESCAPE '\'`.
    pub fn escape_like(pattern: &str) -> String {
        let mut escaped = String::with_capacity(pattern.len());
        for c in pattern.chars() {
            if matches!(c, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }
}
