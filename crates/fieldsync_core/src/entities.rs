//! Entity types of the survey application.

use crate::types::Entity;
use serde::{Deserialize, Serialize};

/// A top-level grouping in a survey template.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Section {
    /// Display name.
    pub name: String,
    /// Position among sibling sections.
    pub order: u32,
    /// Whether the section is collapsed by default.
    pub collapsed: bool,
}

impl Entity for Section {
    const KIND: &'static str = "section";
}

/// A surveyed building element, belonging to a section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    /// Parent section id.
    pub section_id: String,
    /// Display name.
    pub name: String,
    /// Position within the section.
    pub order: u32,
}

impl Entity for Element {
    const KIND: &'static str = "element";
}

/// A component of an element.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Component {
    /// Parent element id.
    pub element_id: String,
    /// Display name.
    pub name: String,
    /// Materials the component can be made of.
    pub materials: Vec<String>,
}

impl Entity for Component {
    const KIND: &'static str = "component";
}

/// Reusable wording describing the condition of a component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionPhrase {
    /// Short label shown in pickers.
    pub name: String,
    /// The phrase inserted into reports.
    pub phrase: String,
    /// Element ids the phrase applies to; empty means all.
    pub element_ids: Vec<String>,
}

impl Entity for ConditionPhrase {
    const KIND: &'static str = "condition_phrase";
}

/// Lifecycle stage of a survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SurveyState {
    /// Being filled in.
    #[default]
    Draft,
    /// Handed in for review.
    Submitted,
    /// Finalized.
    Complete,
}

/// A survey of one property.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Survey {
    /// Property address.
    pub address: String,
    /// Client name.
    pub client: String,
    /// Lifecycle stage.
    pub state: SurveyState,
}

impl Entity for Survey {
    const KIND: &'static str = "survey";
}

/// Metadata of an image attached to a survey; the bytes are handled by the
/// upload engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Owning survey id.
    pub survey_id: String,
    /// Logical path of the image, e.g. `report-images/<survey>/<file>`.
    pub path: String,
    /// Remote object key once uploaded.
    pub remote_key: Option<String>,
    /// Size of the original file.
    pub size_bytes: u64,
    /// Caption shown in reports.
    pub caption: Option<String>,
}

impl Entity for ImageMetadata {
    const KIND: &'static str = "image_metadata";
}
