//! Pull structured JSON out of free-form LLM replies
//!
//! Models wrap their JSON in prose or markdown fences; everything between
//! the first `{` and the last `}` is taken as the payload.

use serde::de::DeserializeOwned;

use crate::core::error::{LablabError, Result};

/// Extract the JSON object from a response with surrounding text
pub fn extract_json(response: &str) -> Result<&str> {
    let start = response
        .find('{')
        .ok_or_else(|| LablabError::Llm("No JSON found in response".into()))?;
    let end = response
        .rfind('}')
        .ok_or_else(|| LablabError::Llm("No closing brace found in response".into()))?;
    if end < start {
        return Err(LablabError::Llm("No closing brace found in response".into()));
    }
    Ok(&response[start..=end])
}

/// Extract and deserialize a JSON payload
pub fn parse_response<T: DeserializeOwned>(response: &str) -> Result<T> {
    let json = extract_json(response)?;
    serde_json::from_str(json).map_err(|e| LablabError::Llm(format!("Failed to parse response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        name: String,
        required: u32,
    }

    #[test]
    fn test_extract_json_simple() {
        let response = r#"{"name": "Rats", "required": 3}"#;
        assert_eq!(extract_json(response).unwrap(), response);
    }

    #[test]
    fn test_extract_json_with_fences() {
        let response = "Here you go:\n```json\n{\"name\": \"Rats\", \"required\": 3}\n```\nEnjoy!";
        let reply: Reply = parse_response(response).unwrap();
        assert_eq!(reply, Reply { name: "Rats".into(), required: 3 });
    }

    #[test]
    fn test_extract_json_no_json() {
        assert!(extract_json("I cannot help with that").is_err());
        assert!(extract_json("} backwards {").is_err());
    }

    #[test]
    fn test_parse_response_bad_shape() {
        let result: Result<Reply> = parse_response(r#"{"title": "x"}"#);
        assert!(matches!(result, Err(LablabError::Llm(_))));
    }
}
