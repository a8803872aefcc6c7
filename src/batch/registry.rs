//! Ordered, keyed collection of requests.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{BarrageError, Result};
use crate::http::Transport;
use crate::request::{Request, TransferOption};

/// Key of a request in a [`BatchRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum RequestKey {
    /// Auto-assigned sequential index
    Index(usize),
    /// Caller-supplied name
    Name(String),
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKey::Index(index) => write!(f, "{}", index),
            RequestKey::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<usize> for RequestKey {
    fn from(index: usize) -> Self {
        RequestKey::Index(index)
    }
}

impl From<&str> for RequestKey {
    fn from(name: &str) -> Self {
        RequestKey::Name(name.to_string())
    }
}

impl From<String> for RequestKey {
    fn from(name: String) -> Self {
        RequestKey::Name(name)
    }
}

impl From<&RequestKey> for RequestKey {
    fn from(key: &RequestKey) -> Self {
        key.clone()
    }
}

/// An insertion-ordered collection of requests, keyed by index or name.
///
/// Unnamed requests get the next unused index, counting from 0. Indices are never renumbered or
/// handed out again after a removal, and named requests do not consume indices.
pub struct BatchRegistry<T: Transport> {
    entries: Vec<(RequestKey, Request<T>)>,
    /// Position of every key in `entries`
    positions: HashMap<RequestKey, usize>,
    next_index: usize,
}

impl<T: Transport> BatchRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
            next_index: 0,
        }
    }

    /// Add a request, under `name` if given and non-empty, otherwise under the next index.
    ///
    /// # Errors
    /// Returns [`BarrageError::DuplicateKey`] if `name` is already registered. The registry is
    /// left unchanged.
    pub fn add(&mut self, request: Request<T>, name: Option<&str>) -> Result<RequestKey> {
        let key = match name.filter(|name| !name.is_empty()) {
            Some(name) => {
                let key = RequestKey::from(name);
                if self.position(&key).is_some() {
                    return Err(BarrageError::DuplicateKey(key));
                }
                key
            }
            None => {
                let key = RequestKey::Index(self.next_index);
                self.next_index += 1;
                key
            }
        };

        tracing::trace!(key = %key, url = %request.url(), "Added request to registry");
        self.positions.insert(key.clone(), self.entries.len());
        self.entries.push((key.clone(), request));
        Ok(key)
    }

    fn position(&self, key: &RequestKey) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn get(&self, key: impl Into<RequestKey>) -> Option<&Request<T>> {
        let key = key.into();
        self.position(&key).map(|index| &self.entries[index].1)
    }

    pub fn get_mut(&mut self, key: impl Into<RequestKey>) -> Option<&mut Request<T>> {
        let key = key.into();
        self.position(&key).map(|index| &mut self.entries[index].1)
    }

    pub fn exists(&self, key: impl Into<RequestKey>) -> bool {
        self.position(&key.into()).is_some()
    }

    /// Remove a request, keeping the order of the others.
    pub fn remove(&mut self, key: impl Into<RequestKey>) -> Option<Request<T>> {
        let key = key.into();
        let index = self.positions.remove(&key)?;
        let (_, request) = self.entries.remove(index);
        for (position, (moved, _)) in self.entries.iter().enumerate().skip(index) {
            if let Some(slot) = self.positions.get_mut(moved) {
                *slot = position;
            }
        }
        tracing::trace!(key = %key, "Removed request from registry");
        Some(request)
    }

    /// Captured body of a request, if it exists and kept its body.
    pub fn content(&self, key: impl Into<RequestKey>) -> Option<&str> {
        self.get(key).and_then(Request::content)
    }

    /// Apply one option to every request.
    ///
    /// Each request accepts or rejects the option independently; there is no aggregate result.
    pub fn configure(&mut self, option: TransferOption) {
        for (key, request) in &mut self.entries {
            if !request.configure(option.clone()) {
                tracing::debug!(key = %key, option = option.name(), "Option rejected by request");
            }
        }
    }

    /// Apply options to every request, with [`Request::configure_all`] semantics per request.
    pub fn configure_all(&mut self, options: &[TransferOption]) {
        for (key, request) in &mut self.entries {
            if !request.configure_all(options.iter().cloned()) {
                tracing::debug!(key = %key, "Not every option was accepted by request");
            }
        }
    }

    /// Requests in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&RequestKey, &Request<T>)> {
        self.entries.iter().map(|(key, request)| (key, request))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&RequestKey, &mut Request<T>)> {
        self.entries.iter_mut().map(|(key, request)| (&*key, request))
    }

    pub fn keys(&self) -> impl Iterator<Item = &RequestKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn requests_mut(&mut self) -> impl Iterator<Item = &mut Request<T>> {
        self.entries.iter_mut().map(|(_, request)| request)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Transport> Default for BatchRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> std::fmt::Debug for BatchRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
