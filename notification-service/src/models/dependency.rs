use serde::{Deserialize, Serialize};

pub const FALLBACK_PROPERTY_TITLE: &str = "Property Information Temporarily Unavailable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl UserDto {
    /// Synthetic user served while the user service is unavailable.
    pub fn fallback(id: i64) -> Self {
        Self {
            id,
            email: format!("fallback-user-{}@system.local", id),
            first_name: Some("System".to_string()),
            last_name: Some("User".to_string()),
            username: Some(format!("fallback-user-{}", id)),
        }
    }

    pub fn full_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        if name.trim().is_empty() {
            self.username.clone()
        } else {
            Some(name.trim().to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDto {
    #[serde(alias = "id")]
    pub property_id: i64,
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub rent_amount: Option<f64>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image2: Option<String>,
    #[serde(default)]
    pub image3: Option<String>,
    #[serde(default)]
    pub image4: Option<String>,
}

impl PropertyDto {
    /// Synthetic property served while the property service is unavailable.
    pub fn fallback(property_id: i64) -> Self {
        Self {
            property_id,
            title: Some(FALLBACK_PROPERTY_TITLE.to_string()),
            description: Some(
                "We're experiencing technical difficulties. Please check back later.".to_string(),
            ),
            address: Some("N/A".to_string()),
            rent_amount: Some(0.0),
            image: None,
            image2: None,
            image3: None,
            image4: None,
        }
    }

    pub fn images(&self) -> Vec<String> {
        [&self.image, &self.image2, &self.image3, &self.image4]
            .into_iter()
            .flatten()
            .filter(|url| !url.is_empty())
            .cloned()
            .collect()
    }
}
