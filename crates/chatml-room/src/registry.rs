//! Room registry: creates, tracks, and closes rooms by name.

use std::collections::HashMap;
use std::sync::Arc;

use chatml_protocol::RoomKind;

use crate::room::spawn_room;
use crate::{ProcessorChain, RoomConfig, RoomError, RoomFlags, RoomHandle, RoomInfo};

/// Maps room names to running rooms.
///
/// This is the entry point for higher layers (the server's accept loop)
/// to find the room a session should attach to. The registry itself is
/// plain data; share it behind a mutex and clone handles out of it before
/// awaiting anything on them.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<String, RoomHandle>,
    config: RoomConfig,
    processors: Arc<ProcessorChain>,
}

impl RoomRegistry {
    /// Creates an empty registry whose rooms use `config` and no
    /// processors.
    pub fn new(config: RoomConfig) -> Self {
        Self::with_processors(config, ProcessorChain::new())
    }

    /// Creates an empty registry whose rooms run every text message
    /// through `processors`.
    pub fn with_processors(config: RoomConfig, processors: ProcessorChain) -> Self {
        Self {
            rooms: HashMap::new(),
            config,
            processors: Arc::new(processors),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn processors(&self) -> &ProcessorChain {
        &self.processors
    }

    /// Creates and registers a new room.
    ///
    /// Fails with [`RoomError::AlreadyExists`] if an open room has this
    /// name. A closed room under the same name is replaced.
    pub fn create(
        &mut self,
        name: &str,
        kind: RoomKind,
        flags: RoomFlags,
    ) -> Result<RoomHandle, RoomError> {
        let name = normalize(name)?;
        if let Some(existing) = self.rooms.get(name) {
            if !existing.is_closed() {
                return Err(RoomError::AlreadyExists(name.to_string()));
            }
        }
        Ok(self.spawn(name, kind, flags))
    }

    /// Returns the open room called `name`, creating a `Multi` room if
    /// there is none.
    pub fn get_or_create(&mut self, name: &str) -> Result<RoomHandle, RoomError> {
        self.get_or_create_with(name, RoomKind::default())
    }

    /// Returns the open room called `name`, creating one of `kind` if
    /// there is none. `kind` is ignored for a room that already exists.
    pub fn get_or_create_with(
        &mut self,
        name: &str,
        kind: RoomKind,
    ) -> Result<RoomHandle, RoomError> {
        let name = normalize(name)?;
        if let Some(handle) = self.rooms.get(name).filter(|h| !h.is_closed()) {
            return Ok(handle.clone());
        }
        Ok(self.spawn(name, kind, RoomFlags::default()))
    }

    /// Returns the open room called `name`.
    pub fn get(&self, name: &str) -> Result<RoomHandle, RoomError> {
        let name = normalize(name)?;
        self.rooms
            .get(name)
            .filter(|h| !h.is_closed())
            .cloned()
            .ok_or_else(|| RoomError::NotFound(name.to_string()))
    }

    /// Unregisters a room and waits for it to close.
    pub async fn close_room(&mut self, name: &str) -> Result<(), RoomError> {
        let name = normalize(name)?;
        let handle = self
            .rooms
            .remove(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;
        handle.close().await;
        tracing::info!(room = %name, "room unregistered");
        Ok(())
    }

    /// Closes every room and empties the registry. Returns how many
    /// rooms were registered.
    pub async fn close_all(&mut self) -> usize {
        let handles: Vec<_> = self.rooms.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            handle.close().await;
        }
        tracing::info!(rooms = count, "all rooms closed");
        count
    }

    /// Drops registry entries for rooms that have closed on their own.
    /// Returns how many were removed.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, handle| !handle.is_closed());
        let pruned = before - self.rooms.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned closed rooms");
        }
        pruned
    }

    /// Snapshots every open room, ordered by name.
    ///
    /// Rooms that close while being queried are skipped.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut infos = Vec::with_capacity(self.rooms.len());
        for handle in self.rooms.values() {
            if handle.is_closed() {
                continue;
            }
            if let Ok(info) = handle.info().await {
                if info.state.is_open() {
                    infos.push(info);
                }
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Number of registered rooms, closed ones not yet pruned included.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Registered room names, sorted.
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.rooms.keys().cloned().collect();
        names.sort();
        names
    }

    fn spawn(&mut self, name: &str, kind: RoomKind, flags: RoomFlags) -> RoomHandle {
        let handle = spawn_room(
            name,
            kind,
            flags,
            self.config.clone(),
            Arc::clone(&self.processors),
        );
        self.rooms.insert(name.to_string(), handle.clone());
        tracing::info!(room = %name, %kind, "room created");
        handle
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

/// Trims a room name and rejects names that are empty after trimming.
fn normalize(name: &str) -> Result<&str, RoomError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RoomError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}
