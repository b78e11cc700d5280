//! Dependency kind enum identifying everything the provisioner manages.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// A provisioned dependency.
///
/// Variants are declared in priority order: when several dependencies are
/// missing, the earliest one is the most urgent. [`DependencyKind::all`]
/// iterates in that order.
///
/// # Example
///
/// ```rust
/// use env_provisioner::DependencyKind;
///
/// let first = DependencyKind::all().next();
/// assert_eq!(first, Some(DependencyKind::Tool));
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::EnumIter,
)]
pub enum DependencyKind {
    /// The version-control client.
    Tool,
    /// The pinned language runtime.
    Runtime,
    /// The source checkout under the install root.
    Checkout,
    /// The isolated environment under the install root.
    Environment,
    /// The downloaded binary artifact.
    Artifact,
    /// The generated run scripts.
    Scripts,
}

impl DependencyKind {
    /// Human-readable display name used in status lines.
    ///
    /// ```rust
    /// use env_provisioner::DependencyKind;
    ///
    /// assert_eq!(DependencyKind::Checkout.display_name(), "Repository");
    /// ```
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Tool => "Git",
            Self::Runtime => "Python",
            Self::Checkout => "Repository",
            Self::Environment => "Virtual Environment",
            Self::Artifact => "AI Model",
            Self::Scripts => "Execution Scripts",
        }
    }

    /// Label used when the dependency is present.
    pub fn present_label(&self) -> &'static str {
        match self {
            Self::Tool | Self::Runtime => "Installed",
            Self::Checkout => "Cloned",
            Self::Environment | Self::Scripts => "Created",
            Self::Artifact => "Downloaded",
        }
    }

    /// Label used when the dependency is absent.
    pub fn absent_label(&self) -> &'static str {
        match self {
            Self::Tool | Self::Runtime => "Not installed",
            Self::Checkout => "Not cloned",
            Self::Environment | Self::Scripts => "Not created",
            Self::Artifact => "Not downloaded",
        }
    }

    /// The numbered suggestion shown when this is the most urgent gap.
    pub fn next_step_suggestion(&self) -> &'static str {
        match self {
            Self::Tool => "1. Install Git first",
            Self::Runtime => "2. Install Python next",
            Self::Checkout => "3. Clone the repository",
            Self::Environment => "4. Setup Python environment",
            Self::Artifact => "5. Download the AI model",
            Self::Scripts => "6. Setup Python environment to generate the run scripts",
        }
    }

    /// Iterator over all dependency kinds in priority order.
    ///
    /// ```rust
    /// use env_provisioner::DependencyKind;
    ///
    /// assert_eq!(DependencyKind::all().count(), 6);
    /// ```
    pub fn all() -> impl Iterator<Item = Self> {
        <Self as IntoEnumIterator>::iter()
    }
}
