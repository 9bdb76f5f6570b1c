use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Binary kind of a stored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Raw,
    /// Let the storage side decide. Never stored.
    Auto,
}

/// Access-control axis of a stored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    Upload,
    Authenticated,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Raw => "raw",
            Self::Auto => "auto",
        }
    }

    /// Concrete type for a content type: `image/*` is an image, the rest raw.
    pub fn for_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            Self::Image
        } else {
            Self::Raw
        }
    }

    /// `auto` resolves against the content type; concrete types pass through.
    pub fn resolve(self, content_type: &str) -> Self {
        match self {
            Self::Auto => Self::for_content_type(content_type),
            concrete => concrete,
        }
    }
}

impl DeliveryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Authenticated => "authenticated",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "raw" => Ok(Self::Raw),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown resource type '{}'", other)),
        }
    }
}

impl FromStr for DeliveryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upload" => Ok(Self::Upload),
            "authenticated" => Ok(Self::Authenticated),
            other => Err(format!("unknown delivery type '{}'", other)),
        }
    }
}

/// One (resource type, delivery type) pair. Pairs are not interchangeable
/// at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    pub resource_type: ResourceType,
    pub delivery_type: DeliveryType,
}

impl Combination {
    pub const fn new(resource_type: ResourceType, delivery_type: DeliveryType) -> Self {
        Self {
            resource_type,
            delivery_type,
        }
    }

    /// Probe order when nothing is known about a resource.
    pub const ALL: [Combination; 6] = [
        Combination::new(ResourceType::Image, DeliveryType::Upload),
        Combination::new(ResourceType::Raw, DeliveryType::Upload),
        Combination::new(ResourceType::Auto, DeliveryType::Upload),
        Combination::new(ResourceType::Image, DeliveryType::Authenticated),
        Combination::new(ResourceType::Raw, DeliveryType::Authenticated),
        Combination::new(ResourceType::Auto, DeliveryType::Authenticated),
    ];
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.delivery_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_by_content_type() {
        assert_eq!(ResourceType::Auto.resolve("image/png"), ResourceType::Image);
        assert_eq!(ResourceType::Auto.resolve("application/pdf"), ResourceType::Raw);
        assert_eq!(ResourceType::Raw.resolve("image/png"), ResourceType::Raw);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("IMAGE".parse::<ResourceType>(), Ok(ResourceType::Image));
        assert_eq!(
            "Authenticated".parse::<DeliveryType>(),
            Ok(DeliveryType::Authenticated)
        );
        assert!("private".parse::<DeliveryType>().is_err());
    }

    #[test]
    fn candidate_order_covers_every_pair_once() {
        let unique: std::collections::HashSet<_> = Combination::ALL.iter().collect();
        assert_eq!(unique.len(), 6);
        assert_eq!(Combination::ALL[0].to_string(), "image/upload");
    }
}
