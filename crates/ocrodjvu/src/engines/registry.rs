//! Engine registration and discovery.
//!
//! The registry maps engine names to factories. Creating an engine only
//! validates its properties; [`load_engine`] also checks the installation,
//! so a missing program surfaces as [`OcrodjvuError::EngineNotFound`] before
//! any page is rendered.
//!
//! Names starting with `_` are hidden from listings but can be requested
//! explicitly.

use super::{CuneiformEngine, DummyEngine, EngineProperties, OcrEngine, OcradEngine, OcropusEngine, TesseractEngine};
use crate::error::{OcrodjvuError, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

/// Engine used when none is requested.
pub const DEFAULT_ENGINE: &str = "tesseract";

/// Creates an engine from its properties.
pub type EngineFactory = fn(EngineProperties) -> Result<Arc<dyn OcrEngine>>;

fn tesseract(properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
    Ok(Arc::new(TesseractEngine::new(properties)?))
}

fn ocrad(properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
    Ok(Arc::new(OcradEngine::new(properties)?))
}

fn cuneiform(properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
    Ok(Arc::new(CuneiformEngine::new(properties)?))
}

fn ocropus(properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
    Ok(Arc::new(OcropusEngine::new(properties)?))
}

fn dummy(properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
    Ok(Arc::new(DummyEngine::new(properties)?))
}

/// Engines shipped with the crate.
const BUILTIN_ENGINES: &[(&str, EngineFactory)] = &[
    (super::tesseract::NAME, tesseract),
    (super::ocrad::NAME, ocrad),
    (super::cuneiform::NAME, cuneiform),
    (super::ocropus::NAME, ocropus),
    (super::dummy::NAME, dummy),
];

/// Validate an engine name before registration.
///
/// # Rules
///
/// - Name cannot be empty
/// - Name cannot contain whitespace
fn validate_engine_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(OcrodjvuError::Validation {
            message: "Engine name cannot be empty".to_string(),
            source: None,
        });
    }

    if name.contains(char::is_whitespace) {
        return Err(OcrodjvuError::Validation {
            message: format!("Engine name '{}' cannot contain whitespace", name),
            source: None,
        });
    }

    Ok(())
}

/// Registry of engine factories, in registration order.
///
/// # Example
///
/// ```rust
/// use ocrodjvu::engines::{EngineProperties, EngineRegistry};
///
/// let registry = EngineRegistry::new();
/// assert_eq!(registry.list(), vec!["cuneiform", "ocrad", "ocropus", "tesseract"]);
/// let engine = registry.create("_dummy", EngineProperties::new())?;
/// assert_eq!(engine.name(), "_dummy");
/// # Ok::<(), ocrodjvu::OcrodjvuError>(())
/// ```
pub struct EngineRegistry {
    factories: IndexMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// Create a registry with the built-in engines.
    pub fn new() -> Self {
        let mut registry = Self::new_empty();
        for (name, factory) in BUILTIN_ENGINES {
            registry.factories.insert((*name).to_string(), *factory);
        }
        registry
    }

    /// Create an empty registry.
    pub fn new_empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Register an engine factory, replacing any factory of the same name.
    pub fn register(&mut self, name: &str, factory: EngineFactory) -> Result<()> {
        validate_engine_name(name)?;
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Remove an engine; returns whether it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.shift_remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Public engine names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .keys()
            .filter(|name| !name.starts_with('_'))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Create an engine without checking its installation.
    pub fn create(&self, name: &str, properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            OcrodjvuError::validation(format!(
                "unknown OCR engine: {} (available: {})",
                name,
                self.list().join(", ")
            ))
        })?;
        factory(properties)
    }

    /// Create an engine and check its installation.
    pub async fn get(&self, name: &str, properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
        let engine = self.create(name, properties)?;
        engine.initialize().await?;
        Ok(engine)
    }

    /// Public engines that are installed, sorted.
    pub async fn available(&self) -> Vec<String> {
        let mut available = Vec::new();
        for name in self.list() {
            match self.get(&name, EngineProperties::new()).await {
                Ok(_) => available.push(name),
                Err(e) => tracing::debug!("Engine {} is not available: {}", name, e),
            }
        }
        available
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global engine registry.
pub static ENGINE_REGISTRY: Lazy<Arc<RwLock<EngineRegistry>>> =
    Lazy::new(|| Arc::new(RwLock::new(EngineRegistry::new())));

/// Get the global engine registry.
pub fn get_engine_registry() -> Arc<RwLock<EngineRegistry>> {
    ENGINE_REGISTRY.clone()
}

/// Create an engine and check its installation from the global registry.
pub async fn load_engine(name: &str, properties: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
    let engine = {
        let registry = ENGINE_REGISTRY
            .read()
            .map_err(|e| OcrodjvuError::LockPoisoned(format!("engine registry: {}", e)))?;
        registry.create(name, properties)?
    };
    engine.initialize().await?;
    Ok(engine)
}

/// Names of installed public engines in the global registry.
pub async fn available_engines() -> Result<Vec<String>> {
    let (names, factories): (Vec<String>, Vec<EngineFactory>) = {
        let registry = ENGINE_REGISTRY
            .read()
            .map_err(|e| OcrodjvuError::LockPoisoned(format!("engine registry: {}", e)))?;
        registry
            .list()
            .into_iter()
            .filter_map(|name| registry.factories.get(&name).map(|factory| (name.clone(), *factory)))
            .unzip()
    };
    let mut available = Vec::new();
    for (name, factory) in names.into_iter().zip(factories) {
        let created = match factory(EngineProperties::new()) {
            Ok(engine) => engine.initialize().await,
            Err(e) => Err(e),
        };
        match created {
            Ok(()) => available.push(name),
            Err(e) => tracing::debug!("Engine {} is not available: {}", name, e),
        }
    }
    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn failing(_: EngineProperties) -> Result<Arc<dyn OcrEngine>> {
        Err(OcrodjvuError::EngineNotFound("broken".to_string()))
    }

    #[test]
    fn test_builtin_engines() {
        let registry = EngineRegistry::new();
        assert_eq!(registry.list(), vec!["cuneiform", "ocrad", "ocropus", "tesseract"]);
        assert!(registry.contains("_dummy"));
        assert_eq!(DEFAULT_ENGINE, "tesseract");
    }

    #[test]
    fn test_unknown_engine() {
        let registry = EngineRegistry::new();
        let err = registry.create("gocr", EngineProperties::new()).err().unwrap();
        assert!(err.to_string().contains("unknown OCR engine: gocr"));
    }

    #[test]
    fn test_register_validates_name() {
        let mut registry = EngineRegistry::new_empty();
        assert!(registry.register("", dummy).is_err());
        assert!(registry.register("my engine", dummy).is_err());
        registry.register("mine", dummy).unwrap();
        assert_eq!(registry.list(), vec!["mine"]);
    }

    #[tokio::test]
    async fn test_get_and_available() {
        let mut registry = EngineRegistry::new_empty();
        registry.register("dummy", dummy).unwrap();
        registry.register("broken", failing).unwrap();
        let engine = registry.get("dummy", EngineProperties::new()).await.unwrap();
        assert_eq!(engine.name(), "_dummy");
        assert_eq!(registry.available().await, vec!["dummy"]);
    }

    #[tokio::test]
    #[serial]
    async fn test_load_engine_from_global_registry() {
        let engine = load_engine("_dummy", EngineProperties::new()).await.unwrap();
        assert_eq!(engine.name(), "_dummy");
        let props: EngineProperties = [("bogus", "1")].into_iter().collect();
        assert!(load_engine("_dummy", props).await.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_custom_engine_in_global_registry() {
        get_engine_registry().write().unwrap().register("custom", dummy).unwrap();
        let engine = load_engine("custom", EngineProperties::new()).await.unwrap();
        assert_eq!(engine.name(), "_dummy");
        assert!(available_engines().await.unwrap().contains(&"custom".to_string()));

        assert!(get_engine_registry().write().unwrap().unregister("custom"));
        assert!(load_engine("custom", EngineProperties::new()).await.is_err());
    }
}
