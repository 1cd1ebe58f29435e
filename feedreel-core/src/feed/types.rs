use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The four listing variants a channel can be queried with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl OrderingMode {
    pub const ALL: [OrderingMode; 4] = [
        OrderingMode::Hot,
        OrderingMode::New,
        OrderingMode::Top,
        OrderingMode::Rising,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderingMode::Hot => "hot",
            OrderingMode::New => "new",
            OrderingMode::Top => "top",
            OrderingMode::Rising => "rising",
        }
    }

    /// Unknown names resolve to the front-page (`hot`) listing instead of failing.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "hot" => OrderingMode::Hot,
            "new" => OrderingMode::New,
            "top" => OrderingMode::Top,
            "rising" => OrderingMode::Rising,
            other => {
                debug!(ordering = other, "unknown ordering mode, using hot");
                OrderingMode::Hot
            }
        }
    }
}

impl fmt::Display for OrderingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDescriptor {
    pub name: String,
    pub ordering: OrderingMode,
    pub limit: u32,
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>, ordering: OrderingMode, limit: u32) -> Self {
        Self {
            name: name.into(),
            ordering,
            limit,
        }
    }
}

/// Image type announced by the suffix of a post URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredType {
    Jpg,
    Jpeg,
    Png,
    Unsupported,
}

impl DeclaredType {
    /// Matches the literal suffix only: `photo.JPG` or `photo.png?x=1` are unsupported.
    pub fn from_url(url: &str) -> Self {
        if url.ends_with(".jpg") {
            DeclaredType::Jpg
        } else if url.ends_with(".jpeg") {
            DeclaredType::Jpeg
        } else if url.ends_with(".png") {
            DeclaredType::Png
        } else {
            DeclaredType::Unsupported
        }
    }

    pub fn extension(&self) -> Option<&'static str> {
        match self {
            DeclaredType::Jpg => Some("jpg"),
            DeclaredType::Jpeg => Some("jpeg"),
            DeclaredType::Png => Some("png"),
            DeclaredType::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DeclaredType::Unsupported)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidatePost {
    pub id: String,
    pub url: String,
    pub declared_type: DeclaredType,
}

impl CandidatePost {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let declared_type = DeclaredType::from_url(&url);
        Self {
            id: id.into(),
            url,
            declared_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_names_are_permissive() {
        assert_eq!(OrderingMode::from_name("new"), OrderingMode::New);
        assert_eq!(OrderingMode::from_name(" TOP "), OrderingMode::Top);
        assert_eq!(OrderingMode::from_name("rising"), OrderingMode::Rising);
        assert_eq!(OrderingMode::from_name("controversial"), OrderingMode::Hot);
        assert_eq!(OrderingMode::from_name(""), OrderingMode::Hot);
    }

    #[test]
    fn declared_type_follows_suffix() {
        assert_eq!(
            DeclaredType::from_url("https://i.redd.it/a.jpg"),
            DeclaredType::Jpg
        );
        assert_eq!(
            DeclaredType::from_url("https://i.redd.it/a.jpeg"),
            DeclaredType::Jpeg
        );
        assert_eq!(
            DeclaredType::from_url("https://i.redd.it/a.png"),
            DeclaredType::Png
        );
        assert_eq!(
            DeclaredType::from_url("https://i.redd.it/a.gif"),
            DeclaredType::Unsupported
        );
        assert_eq!(
            DeclaredType::from_url("https://v.redd.it/abc"),
            DeclaredType::Unsupported
        );
        assert_eq!(
            DeclaredType::from_url("https://i.redd.it/a.PNG"),
            DeclaredType::Unsupported
        );
    }
}
