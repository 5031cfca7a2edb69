use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A unique layer number (typically the GDS layer number).
pub type LayerId = u32;

/// A (layer, datatype) pair identifying where shapes live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Layer {
    pub layer: LayerId,
    pub datatype: u32,
}

impl Layer {
    pub const fn new(layer: LayerId, datatype: u32) -> Self {
        Self { layer, datatype }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layer, self.datatype)
    }
}

impl From<(LayerId, u32)> for Layer {
    fn from((layer, datatype): (LayerId, u32)) -> Self {
        Self::new(layer, datatype)
    }
}

/// Human-readable layer names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerNames {
    names: BTreeMap<Layer, String>,
}

impl LayerNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, layer: Layer, name: &str) {
        self.names.insert(layer, name.to_string());
    }

    pub fn get(&self, layer: Layer) -> Option<&str> {
        self.names.get(&layer).map(String::as_str)
    }

    pub fn remove(&mut self, layer: Layer) -> Option<String> {
        self.names.remove(&layer)
    }

    /// Move the name of `src` to `dst`, replacing whatever `dst` had.
    pub fn rename(&mut self, src: Layer, dst: Layer) {
        if let Some(name) = self.names.remove(&src) {
            self.names.insert(dst, name);
        }
    }

    pub fn find(&self, name: &str) -> Option<Layer> {
        self.names.iter().find(|(_, n)| n.as_str() == name).map(|(l, _)| *l)
    }

    /// Named layers in order.
    pub fn layers(&self) -> impl Iterator<Item = Layer> + '_ {
        self.names.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_order_and_display() {
        let a = Layer::new(1, 0);
        let b = Layer::new(1, 2);
        let c = Layer::new(2, 0);
        assert!(a < b && b < c);
        assert_eq!(b.to_string(), "1/2");
    }

    #[test]
    fn test_layer_names() {
        let mut names = LayerNames::new();
        names.set(Layer::new(10, 0), "metal1");
        assert_eq!(names.get(Layer::new(10, 0)), Some("metal1"));
        names.rename(Layer::new(10, 0), Layer::new(11, 0));
        assert_eq!(names.get(Layer::new(10, 0)), None);
        assert_eq!(names.find("metal1"), Some(Layer::new(11, 0)));
    }
}
