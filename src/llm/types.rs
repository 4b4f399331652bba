use serde::{Deserialize, Serialize};

/// One prompt message. Roles are `system`, `user` or `model`; providers
/// translate to their own wire vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            content: content.into(),
        }
    }
}

/// An inline image forwarded to the provider alongside the final user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePart {
    pub mime_type: String,
    /// Raw base64 payload, without any `data:` URL prefix.
    pub data: String,
}

impl ImagePart {
    /// Parses a `data:image/png;base64,...` URL as sent by browsers.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let (header, data) = url.split_once(',')?;
        let mime_type = header.strip_prefix("data:")?.split(';').next()?.to_string();
        if mime_type.is_empty() || data.is_empty() {
            return None;
        }
        Some(Self {
            mime_type,
            data: data.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_part_parses_data_urls() {
        let part = ImagePart::from_data_url("data:image/png;base64,AAAA").unwrap();
        assert_eq!(part.mime_type, "image/png");
        assert_eq!(part.data, "AAAA");

        assert!(ImagePart::from_data_url("not a data url").is_none());
        assert!(ImagePart::from_data_url("data:;base64,").is_none());
    }
}
