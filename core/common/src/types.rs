//! Common types used throughout Integrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use zeroize::Zeroize;

use crate::{Error, Result};

/// Bearer token that zeroizes on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw bearer string.
    ///
    /// # Errors
    /// - Returns error if the token is empty
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::Authentication("Access token is empty".to_string()));
        }
        Ok(Self(token))
    }

    /// Get the raw bearer string.
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// First characters of the token, safe for logs.
    pub fn preview(&self) -> String {
        let head: String = self.0.chars().take(8).collect();
        format!("{}...", head)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([REDACTED; {} chars])", self.0.len())
    }
}

/// Type discriminant of a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Can hold children (folder, notebook, section).
    Container,
    /// Cannot hold children (file, page).
    Leaf,
}

/// One entry of a walked resource tree.
///
/// Built fresh on every walk. Leaves have no child collection; containers
/// always have one, possibly empty when the listing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Display name returned by the API.
    pub name: String,
    /// Opaque id returned by the API.
    pub id: String,
    /// Container or leaf.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Children in API order (containers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ResourceNode>>,
    /// Set when the listing had more pages than were fetched.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ResourceNode {
    /// Create a leaf node.
    pub fn leaf(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind: ResourceKind::Leaf,
            children: None,
            truncated: false,
        }
    }

    /// Create a container node with the given children.
    pub fn container(
        name: impl Into<String>,
        id: impl Into<String>,
        children: Vec<ResourceNode>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind: ResourceKind::Container,
            children: Some(children),
            truncated: false,
        }
    }

    /// Check if this is a container.
    pub fn is_container(&self) -> bool {
        self.kind == ResourceKind::Container
    }

    /// Children of a container, empty for leaves.
    pub fn children(&self) -> &[ResourceNode] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&ResourceNode> {
        self.children().iter().find(|c| c.name == name)
    }

    /// Number of nodes in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(ResourceNode::count).sum::<usize>()
    }
}

/// Extract the folder id from a shared folder URL.
///
/// The id is the percent-decoded `id` query parameter, so
/// `https://onedrive.live.com/?id=ABC%21123&cid=ABC` yields `ABC!123`.
///
/// # Errors
/// - URL cannot be parsed
/// - No `id` parameter, or an empty one
pub fn extract_folder_id(folder_url: &str) -> Result<String> {
    let parsed = Url::parse(folder_url)
        .map_err(|e| Error::Config(format!("Invalid folder URL '{}': {}", folder_url, e)))?;

    parsed
        .query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Config(format!("Folder ID not found in the URL '{}'", folder_url)))
}
