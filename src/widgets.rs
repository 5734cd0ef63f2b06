//! Widget configuration boundary
//!
//! Widgets themselves are rendered elsewhere. What reaches the bus is a
//! validated [`WidgetSpec`], turned into a [`SeriesBinding`] that tells the
//! bus which series to feed from which topic.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BusError, BusResult};
use crate::extract::FieldPath;

/// Samples kept by a chart widget
pub const CHART_CAPACITY: usize = 20;
/// Samples kept by a sensor widget (feeds the detail view)
pub const SENSOR_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    /// Current value with a longer history
    #[default]
    Sensor,
    /// Short rolling chart
    Chart,
}

impl WidgetKind {
    pub fn default_capacity(&self) -> usize {
        match self {
            WidgetKind::Sensor => SENSOR_CAPACITY,
            WidgetKind::Chart => CHART_CAPACITY,
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetKind::Sensor => write!(f, "sensor"),
            WidgetKind::Chart => write!(f, "chart"),
        }
    }
}

/// A widget instance as configured by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
    /// Instance id; generated when left empty. Set it to keep series
    /// history across restarts.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub kind: WidgetKind,
    pub title: String,
    pub topic: String,
    /// Dot-delimited path of the value inside the decoded payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Expression parser to install for the topic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    /// Override of the kind's default history length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

impl WidgetSpec {
    pub fn new(kind: WidgetKind, title: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind,
            title: title.into(),
            topic: topic.into(),
            path: None,
            unit: None,
            parser: None,
            capacity: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn parser(mut self, expression: impl Into<String>) -> Self {
        self.parser = Some(expression.into());
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Reject specs missing a title or topic
    pub fn validate(&self) -> BusResult<()> {
        if self.title.trim().is_empty() {
            return Err(BusError::config("widget title is required"));
        }
        if self.topic.trim().is_empty() {
            return Err(BusError::config("widget topic is required"));
        }
        if self.capacity == Some(0) {
            return Err(BusError::config("widget capacity must be at least 1"));
        }
        Ok(())
    }

    /// Validate and produce the series binding for this widget
    pub fn binding(&self) -> BusResult<SeriesBinding> {
        self.validate()?;

        let series_id = if self.id.trim().is_empty() {
            generate_widget_id()
        } else {
            self.id.clone()
        };

        Ok(SeriesBinding {
            series_id,
            topic: self.topic.trim().to_string(),
            path: self.path.as_deref().and_then(FieldPath::parse),
            capacity: self.capacity.unwrap_or_else(|| self.kind.default_capacity()),
        })
    }
}

/// Generate a unique widget id like `widget-3f2a9c1d4b5e6f708192a3b4c5d6e7f8`.
/// Generated ids differ on every run, so a widget whose history should be
/// restored needs an explicit id.
pub fn generate_widget_id() -> String {
    format!("widget-{}", uuid::Uuid::new_v4().simple())
}

/// Feeds one series from one topic through one path
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBinding {
    pub series_id: String,
    pub topic: String,
    pub path: Option<FieldPath>,
    pub capacity: usize,
}

impl SeriesBinding {
    pub fn new(series_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            series_id: series_id.into(),
            topic: topic.into(),
            path: None,
            capacity: CHART_CAPACITY,
        }
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = FieldPath::parse(path);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_missing_fields() {
        let err = WidgetSpec::new(WidgetKind::Sensor, "", "sensors/t1")
            .validate()
            .unwrap_err();
        assert!(matches!(err, BusError::Configuration(ref m) if m.contains("title")));

        let err = WidgetSpec::new(WidgetKind::Sensor, "Temperature", "  ")
            .validate()
            .unwrap_err();
        assert!(matches!(err, BusError::Configuration(ref m) if m.contains("topic")));

        let err = WidgetSpec::new(WidgetKind::Chart, "T", "t")
            .capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, BusError::Configuration(_)));
    }

    #[test]
    fn test_binding_defaults_by_kind() {
        let chart = WidgetSpec::new(WidgetKind::Chart, "Temp", "sensors/t1")
            .id("w1")
            .path("value")
            .binding()
            .unwrap();
        assert_eq!(chart.series_id, "w1");
        assert_eq!(chart.capacity, CHART_CAPACITY);
        assert_eq!(chart.path, FieldPath::parse("value"));

        let sensor = WidgetSpec::new(WidgetKind::Sensor, "Temp", "sensors/t1")
            .id("w2")
            .binding()
            .unwrap();
        assert_eq!(sensor.capacity, SENSOR_CAPACITY);
        assert_eq!(sensor.path, None);
    }

    #[test]
    fn test_binding_generates_id() {
        let binding = WidgetSpec::new(WidgetKind::Chart, "Temp", "t")
            .binding()
            .unwrap();
        assert!(binding.series_id.starts_with("widget-"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let spec = WidgetSpec::new(WidgetKind::Chart, "Temp", "t");
        let first = spec.binding().unwrap();
        let second = spec.binding().unwrap();
        assert_ne!(first.series_id, second.series_id);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let spec: WidgetSpec = toml::from_str(
            r#"
            id = "living-room"
            kind = "chart"
            title = "Living room"
            topic = "home/living/temp"
            path = "sensor.value"
            capacity = 50
            "#,
        )
        .unwrap();

        assert_eq!(spec.kind, WidgetKind::Chart);
        let binding = spec.binding().unwrap();
        assert_eq!(binding.capacity, 50);
        assert_eq!(binding.path.unwrap().to_string(), "sensor.value");
    }
}
