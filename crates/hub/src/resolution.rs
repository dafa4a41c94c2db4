//! Shared types for the tenant and backend resolution steps

use dossier_crd::Annotated;
use kube::{Resource, ResourceExt};
use serde::Serialize;

/// Outcome of a resolution step
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Exactly one candidate was found and bound
    Bound(T),
    /// The user has to pick one of these
    NeedsChoice(Vec<Choice>),
}

impl<T> Resolution<T> {
    pub const fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }
}

/// A candidate shown on a selection page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub slug: String,
}

impl Choice {
    /// Build a choice from an annotated object
    pub fn from_resource<K: Resource>(object: &K) -> Self {
        let name = object.name_any();
        Self {
            display_name: object.display_name().map(str::to_string),
            description: object.description().map(str::to_string),
            slug: slugify(&name),
            name,
        }
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether a submitted selection refers to this choice
    pub fn matches(&self, selection: &str) -> bool {
        self.name == selection || self.slug == selection
    }
}

/// Lowercase ASCII slug: runs of anything other than letters and digits
/// collapse into a single `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
