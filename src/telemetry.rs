//! Name-keyed telemetry values shown next to the image.
//!
//! Workers never touch the collection directly: they produce
//! [`TelemetryUpdate`]s which the presentation executor applies to its
//! [`TelemetryBoard`].

use crate::types::JointId;

pub const NUMBER_OF_BODIES: &str = "Number of bodies";
pub const BRAND_PREFIX: &str = "Brand: ";

pub const ACCELEROMETER_TIMESTAMP: &str = "Accelerometer: Timestamp";
pub const ACCELEROMETER_X: &str = "Accelerometer: X";
pub const ACCELEROMETER_Y: &str = "Accelerometer: Y";
pub const ACCELEROMETER_Z: &str = "Accelerometer: Z";
pub const GYRO_TIMESTAMP: &str = "Gyro: Timestamp";
pub const GYRO_X: &str = "Gyro: X";
pub const GYRO_Y: &str = "Gyro: Y";
pub const GYRO_Z: &str = "Gyro: Z";
pub const TEMPERATURE: &str = "Temperature";

/// Item name for a joint's confidence; `body` is zero-based.
pub fn joint_item_name(body: usize, joint: JointId) -> String {
    format!("Body: {} Joint: {}", body + 1, joint.name())
}

pub fn brand_item_name(tag: &str) -> String {
    format!("{}{}", BRAND_PREFIX, tag)
}

/// A change to the telemetry collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryUpdate {
    /// Insert the item, or replace the value of an existing item with the same name.
    Upsert { name: String, value: String },
    /// Remove every item whose name starts with the prefix.
    RemovePrefix(String),
    /// Remove everything.
    Clear,
}

impl TelemetryUpdate {
    pub fn upsert(name: impl Into<String>, value: impl Into<String>) -> Self {
        TelemetryUpdate::Upsert {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryItem {
    pub name: String,
    pub value: String,
}

/// Insertion-ordered telemetry collection owned by the presentation side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryBoard {
    items: Vec<TelemetryItem>,
}

impl TelemetryBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update. Returns whether the collection changed.
    pub fn apply(&mut self, update: TelemetryUpdate) -> bool {
        match update {
            TelemetryUpdate::Upsert { name, value } => {
                match self.items.iter_mut().find(|item| item.name == name) {
                    Some(item) if item.value == value => false,
                    Some(item) => {
                        item.value = value;
                        true
                    }
                    None => {
                        self.items.push(TelemetryItem { name, value });
                        true
                    }
                }
            }
            TelemetryUpdate::RemovePrefix(prefix) => {
                let before = self.items.len();
                self.items.retain(|item| !item.name.starts_with(&prefix));
                self.items.len() != before
            }
            TelemetryUpdate::Clear => {
                let changed = !self.items.is_empty();
                self.items.clear();
                changed
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.value.as_str())
    }

    pub fn items(&self) -> &[TelemetryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
