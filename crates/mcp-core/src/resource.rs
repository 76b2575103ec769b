use serde::{Deserialize, Serialize};

/// The MIME type that marks a resource as an interactive HTML surface.
pub const HTML_MIME_TYPE: &str = "text/html";

/// Contents of a resource as returned by an MCP server, either inline text or
/// base64 encoded binary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    #[serde(rename_all = "camelCase")]
    TextResourceContents {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    BlobResourceContents {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        blob: String,
    },
}

impl ResourceContents {
    pub fn text<U: Into<String>, T: Into<String>>(uri: U, mime_type: Option<&str>, text: T) -> Self {
        ResourceContents::TextResourceContents {
            uri: uri.into(),
            mime_type: mime_type.map(str::to_string),
            text: text.into(),
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            ResourceContents::TextResourceContents { uri, .. }
            | ResourceContents::BlobResourceContents { uri, .. } => uri,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            ResourceContents::TextResourceContents { mime_type, .. }
            | ResourceContents::BlobResourceContents { mime_type, .. } => mime_type.as_deref(),
        }
    }

    pub fn is_html(&self) -> bool {
        self.mime_type() == Some(HTML_MIME_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_and_blob_are_distinguished() {
        let text: ResourceContents = serde_json::from_value(json!({
            "uri": "ui://widget/1",
            "mimeType": "text/html",
            "text": "<p>hi</p>"
        }))
        .unwrap();
        assert!(matches!(text, ResourceContents::TextResourceContents { .. }));
        assert!(text.is_html());

        let blob: ResourceContents = serde_json::from_value(json!({
            "uri": "file:///logo.png",
            "mimeType": "image/png",
            "blob": "aGVsbG8="
        }))
        .unwrap();
        assert!(matches!(blob, ResourceContents::BlobResourceContents { .. }));
        assert_eq!(blob.uri(), "file:///logo.png");
        assert!(!blob.is_html());
    }
}
