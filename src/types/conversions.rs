use serde_json::Value;

// Balances travel as decimal integer text (Uint128 on chain), never as floats.
pub fn normalize_balance(raw: &str) -> Result<String, ConversionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok("0".to_string());
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConversionError::InvalidBalance(trimmed.to_string()));
    }
    let stripped = trimmed.trim_start_matches('0');
    if stripped.is_empty() {
        Ok("0".to_string())
    } else {
        Ok(stripped.to_string())
    }
}

// Some gateways answer with a JSON number instead of a string
pub fn balance_from_value(value: &Value) -> Result<String, ConversionError> {
    match value {
        Value::Null => Ok("0".to_string()),
        Value::String(s) => normalize_balance(s),
        Value::Number(n) if n.is_u64() => Ok(n.to_string()),
        other => Err(ConversionError::InvalidBalance(other.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid balance: {0}")]
    InvalidBalance(String),
    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_balance() {
        assert_eq!(normalize_balance("100").unwrap(), "100");
        assert_eq!(normalize_balance(" 000120 ").unwrap(), "120");
        assert_eq!(normalize_balance("").unwrap(), "0");
        assert_eq!(normalize_balance("0000").unwrap(), "0");
        // Larger than u64, must survive untouched
        assert_eq!(
            normalize_balance("340282366920938463463374607431768211455").unwrap(),
            "340282366920938463463374607431768211455"
        );
        assert!(normalize_balance("-5").is_err());
        assert!(normalize_balance("1.5").is_err());
    }

    #[test]
    fn test_balance_from_value() {
        assert_eq!(balance_from_value(&json!("42")).unwrap(), "42");
        assert_eq!(balance_from_value(&json!(42)).unwrap(), "42");
        assert_eq!(balance_from_value(&Value::Null).unwrap(), "0");
        assert!(balance_from_value(&json!(-1)).is_err());
        assert!(balance_from_value(&json!({"amount": "1"})).is_err());
    }
}
