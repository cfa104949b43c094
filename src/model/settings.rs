use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Wide => "16:9",
        }
    }
}

/// Where the pictograms are meant to be read; steers culturally specific
/// imagery.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoContext {
    pub place: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// User-editable studio settings.
///
/// Passed explicitly into every collaborator request; the pipeline itself
/// never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub style_directives: String,
    pub aspect_ratio: AspectRatio,
    pub analysis_model: String,
    pub image_model: String,
    pub language: String,
    pub geo_context: Option<GeoContext>,
    pub author: String,
    pub license: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            style_directives: "flat pictogram, thick black outlines, plain white background"
                .to_string(),
            aspect_ratio: AspectRatio::Square,
            analysis_model: "default-text".to_string(),
            image_model: "default-image".to_string(),
            language: "es".to_string(),
            geo_context: None,
            author: String::new(),
            license: "CC BY-SA 4.0".to_string(),
        }
    }
}
