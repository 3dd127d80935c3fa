//! Content suppliers for scenes: image providers (posts with an image URL) and shader providers
//! (shader page URLs).
//!
//! Both hand out items in FIFO order from an "available" queue and park them in an "already
//! shown" list. Reading never refills; only `flush()` does, in shuffled order.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PropertyError, ProviderError};
use crate::property::{Property, PropertySet, PropertyValue};

/// One image to show, plus the page it came from when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
}

impl Post {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            post_url: None,
        }
    }
}

/// State shared by every provider.
#[derive(Debug, Default)]
pub struct ProviderBase {
    properties: PropertySet,
    uuid: String,
    properties_registered: bool,
}

impl ProviderBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property<T: PropertyValue>(&mut self, property: &Property<T>) -> Result<(), PropertyError> {
        self.properties.add(property)
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn set_uuid(&mut self, uuid: impl Into<String>) {
        self.uuid = uuid.into();
    }

    pub(crate) fn properties_registered(&self) -> bool {
        self.properties_registered
    }

    pub(crate) fn mark_properties_registered(&mut self) {
        self.properties_registered = true;
    }
}

pub trait ImageProvider: Send {
    fn base(&self) -> &ProviderBase;
    fn base_mut(&mut self) -> &mut ProviderBase;

    fn name(&self) -> String;

    fn register_properties(&mut self) -> Result<(), PropertyError> {
        Ok(())
    }

    fn load_properties(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.base().properties().load_from_json(args)
    }

    /// Next post, or `Exhausted` once everything was handed out since the last flush.
    fn next_image(&mut self) -> Result<Post, ProviderError>;

    fn flush(&mut self);

    fn to_json(&self) -> Value {
        self.base().properties().to_json()
    }
}

pub trait ShaderProvider: Send {
    fn base(&self) -> &ProviderBase;
    fn base_mut(&mut self) -> &mut ProviderBase;

    fn name(&self) -> String;

    fn register_properties(&mut self) -> Result<(), PropertyError> {
        Ok(())
    }

    fn load_properties(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.base().properties().load_from_json(args)
    }

    fn next_shader(&mut self) -> Result<String, ProviderError>;

    fn flush(&mut self);

    /// Periodic housekeeping (paging, prefetch). Called from the owning scene.
    fn tick(&mut self) {}

    fn to_json(&self) -> Value {
        self.base().properties().to_json()
    }
}

pub fn prepare_image_provider(provider: &mut dyn ImageProvider) -> Result<(), PropertyError> {
    if provider.base().properties_registered() {
        return Ok(());
    }
    provider.register_properties()?;
    provider.base_mut().mark_properties_registered();
    Ok(())
}

pub fn prepare_shader_provider(provider: &mut dyn ShaderProvider) -> Result<(), PropertyError> {
    if provider.base().properties_registered() {
        return Ok(());
    }
    provider.register_properties()?;
    provider.base_mut().mark_properties_registered();
    Ok(())
}

/// FIFO of unseen items plus the items already handed out.
#[derive(Debug, Clone)]
pub struct ContentQueue<T> {
    available: VecDeque<T>,
    shown: Vec<T>,
    last: Option<T>,
}

impl<T> Default for ContentQueue<T> {
    fn default() -> Self {
        Self {
            available: VecDeque::new(),
            shown: Vec::new(),
            last: None,
        }
    }
}

impl<T: Clone + PartialEq> ContentQueue<T> {
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            available: items.into_iter().collect(),
            shown: Vec::new(),
            last: None,
        }
    }

    pub fn next(&mut self) -> Option<T> {
        let item = self.available.pop_front()?;
        self.shown.push(item.clone());
        self.last = Some(item.clone());
        Some(item)
    }

    pub fn flush(&mut self) {
        self.flush_with(&mut rand::rng());
    }

    /// Merge everything back into `available` in shuffled order. The item handed out last is
    /// never placed at the head.
    pub fn flush_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut items: Vec<T> = self.available.drain(..).collect();
        items.append(&mut self.shown);
        items.shuffle(rng);
        if items.len() > 1 && self.last.as_ref() == items.first() {
            items.rotate_left(1);
        }
        self.available = items.into();
    }

    pub fn available(&self) -> usize {
        self.available.len()
    }

    pub fn shown(&self) -> usize {
        self.shown.len()
    }

    pub fn len(&self) -> usize {
        self.available.len() + self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Built-in image provider over a fixed list of image URLs.
pub struct ImageCollection {
    base: ProviderBase,
    images: Property<Vec<String>>,
    queue: ContentQueue<String>,
}

impl ImageCollection {
    pub const NAME: &'static str = "collection";

    pub fn new() -> Self {
        Self {
            base: ProviderBase::new(),
            images: Property::new("images", Vec::new()),
            queue: ContentQueue::default(),
        }
    }
}

impl Default for ImageCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProvider for ImageCollection {
    fn base(&self) -> &ProviderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProviderBase {
        &mut self.base
    }

    fn name(&self) -> String {
        Self::NAME.to_string()
    }

    fn register_properties(&mut self) -> Result<(), PropertyError> {
        self.base.add_property(&self.images)
    }

    fn load_properties(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.base.properties().load_from_json(args)?;
        self.queue = ContentQueue::from_items(self.images.get()?);
        Ok(())
    }

    fn next_image(&mut self) -> Result<Post, ProviderError> {
        self.queue.next().map(Post::new).ok_or(ProviderError::Exhausted)
    }

    fn flush(&mut self) {
        self.queue.flush();
    }
}

/// Built-in shader provider over a fixed list of shader page URLs.
pub struct ShaderCollection {
    base: ProviderBase,
    urls: Property<Vec<String>>,
    queue: ContentQueue<String>,
}

impl ShaderCollection {
    pub const NAME: &'static str = "shader_collection";

    pub fn new() -> Self {
        Self {
            base: ProviderBase::new(),
            urls: Property::new("urls", Vec::new()),
            queue: ContentQueue::default(),
        }
    }
}

impl Default for ShaderCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept `https://…`, upgrade `http://…`, and prefix bare hosts with `https://`.
pub fn normalize_shader_url(raw: &str) -> Result<String, String> {
    let url = raw.trim();
    if url.is_empty() || url.contains(char::is_whitespace) {
        return Err(format!("'{raw}' is not a URL"));
    }
    if url.starts_with("https://") {
        return Ok(url.to_string());
    }
    if let Some(rest) = url.strip_prefix("http://") {
        return Ok(format!("https://{rest}"));
    }
    if url.contains("://") || !url.contains('.') {
        return Err(format!("'{raw}' is not an http(s) URL"));
    }
    Ok(format!("https://{url}"))
}

impl ShaderProvider for ShaderCollection {
    fn base(&self) -> &ProviderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProviderBase {
        &mut self.base
    }

    fn name(&self) -> String {
        Self::NAME.to_string()
    }

    fn register_properties(&mut self) -> Result<(), PropertyError> {
        self.base.add_property(&self.urls)
    }

    fn load_properties(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.base.properties().load_from_json(args)?;
        let urls = self
            .urls
            .get()?
            .iter()
            .map(|u| normalize_shader_url(u))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| PropertyError::InvalidValue {
                name: "urls".into(),
                reason,
            })?;
        self.urls.set_value(urls.clone());
        self.queue = ContentQueue::from_items(urls);
        Ok(())
    }

    fn next_shader(&mut self) -> Result<String, ProviderError> {
        self.queue.next().ok_or(ProviderError::Exhausted)
    }

    fn flush(&mut self) {
        self.queue.flush();
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_queue_is_fifo_and_exhausts() {
        let mut q = ContentQueue::from_items(["a", "b", "c"]);
        assert_eq!(q.next(), Some("a"));
        assert_eq!(q.next(), Some("b"));
        assert_eq!(q.next(), Some("c"));
        assert_eq!(q.next(), None);
        assert_eq!(q.shown(), 3);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_flush_restores_items_in_shuffled_order() {
        let items: Vec<u32> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let mut reordered = false;

        for _ in 0..20 {
            let mut q = ContentQueue::from_items(items.clone());
            while q.next().is_some() {}
            q.flush_with(&mut rng);
            assert_eq!(q.available(), items.len());
            assert_eq!(q.shown(), 0);

            let mut order = Vec::new();
            while let Some(i) = q.next() {
                order.push(i);
            }
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(sorted, items);
            reordered |= order != items;
        }
        assert!(reordered);
    }

    #[test]
    fn test_flush_never_repeats_last_item_first() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let mut q = ContentQueue::from_items(["x", "y", "z"]);
            let mut last = None;
            while let Some(i) = q.next() {
                last = Some(i);
            }
            q.flush_with(&mut rng);
            assert_ne!(q.next(), last);
        }
    }

    #[test]
    fn test_flush_keeps_unseen_items() {
        let mut q = ContentQueue::from_items([1, 2, 3, 4]);
        q.next();
        q.flush();
        assert_eq!(q.available(), 4);
    }

    #[test]
    fn test_image_collection() {
        let mut provider = ImageCollection::new();
        prepare_image_provider(&mut provider).unwrap();
        provider
            .load_properties(&json!({"images": ["https://a/1.png", "https://a/2.png"]}))
            .unwrap();

        assert_eq!(provider.next_image().unwrap().image_url, "https://a/1.png");
        assert_eq!(provider.next_image().unwrap().image_url, "https://a/2.png");
        assert_eq!(provider.next_image(), Err(ProviderError::Exhausted));

        provider.flush();
        assert!(provider.next_image().is_ok());
        assert_eq!(provider.to_json(), json!({"images": ["https://a/1.png", "https://a/2.png"]}));
    }

    #[test]
    fn test_shader_urls_are_normalized() {
        assert_eq!(
            normalize_shader_url("www.shadertoy.com/view/abc").unwrap(),
            "https://www.shadertoy.com/view/abc"
        );
        assert_eq!(
            normalize_shader_url("http://example.org/s").unwrap(),
            "https://example.org/s"
        );
        assert!(normalize_shader_url("not a url").is_err());
        assert!(normalize_shader_url("ftp://example.org").is_err());

        let mut provider = ShaderCollection::new();
        prepare_shader_provider(&mut provider).unwrap();
        provider
            .load_properties(&json!({"urls": ["shadertoy.com/view/x"]}))
            .unwrap();
        assert_eq!(provider.next_shader().unwrap(), "https://shadertoy.com/view/x");
        assert_eq!(provider.to_json(), json!({"urls": ["https://shadertoy.com/view/x"]}));

        let err = provider.load_properties(&json!({"urls": ["nope"]})).unwrap_err();
        assert!(matches!(err, PropertyError::InvalidValue { .. }));
    }
}
