//! Three-state note registry
//!
//! Every active note lives in exactly one of three states. Each state keeps
//! ordered indices by note key, by creation order and by slot over a shared
//! arena of note records.

use std::collections::BTreeMap;

use serde::Serialize;

use super::active_note::{ActiveNote, NoteKey, Slot};
use crate::error::{Error, Result};

/// Which index a note currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteState {
    /// Key is down
    Sounding,
    /// Key released, envelope in its release stage
    Released,
    /// Key released while the hold pedal was down
    Held,
}

impl NoteState {
    /// Lookup priority when searching all states for a key
    pub const PRIORITY: [NoteState; 3] = [NoteState::Sounding, NoteState::Released, NoteState::Held];

    /// Order used when broadcasting to the notes of a channel
    const BROADCAST: [NoteState; 3] = [NoteState::Sounding, NoteState::Held, NoteState::Released];
}

type NoteId = usize;

#[derive(Debug, Default)]
struct Index {
    by_key: BTreeMap<NoteKey, NoteId>,
    by_order: BTreeMap<u64, NoteId>,
    by_slot: BTreeMap<Slot, NoteId>,
}

/// Arena of active notes with per-state indices
#[derive(Debug, Default)]
pub struct NoteRegistry {
    arena: Vec<Option<ActiveNote>>,
    vacant: Vec<NoteId>,
    sounding: Index,
    released: Index,
    held: Index,
}

impl NoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, state: NoteState) -> &Index {
        match state {
            NoteState::Sounding => &self.sounding,
            NoteState::Released => &self.released,
            NoteState::Held => &self.held,
        }
    }

    fn index_mut(&mut self, state: NoteState) -> &mut Index {
        match state {
            NoteState::Sounding => &mut self.sounding,
            NoteState::Released => &mut self.released,
            NoteState::Held => &mut self.held,
        }
    }

    fn record(&self, id: NoteId) -> Option<ActiveNote> {
        self.arena.get(id).copied().flatten()
    }

    /// Number of tracked notes across all states
    pub fn len(&self) -> usize {
        self.arena.len() - self.vacant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of notes in one state
    pub fn count(&self, state: NoteState) -> usize {
        self.index(state).by_key.len()
    }

    /// Add a note to `state`
    ///
    /// Fails if the key or the slot is already tracked anywhere.
    pub fn insert(&mut self, state: NoteState, note: ActiveNote) -> Result<()> {
        if let Some((existing, _)) = self.find_any(note.key) {
            return Err(Error::InvalidMidiOperation(format!(
                "Channel {} note {} is already {:?}",
                note.channel(),
                note.note(),
                existing
            )));
        }
        if self.find_slot(note.slot).is_some() {
            return Err(Error::InvalidMidiOperation(format!(
                "Slot {} is already in use",
                note.slot
            )));
        }

        let id = match self.vacant.pop() {
            Some(id) => {
                self.arena[id] = Some(note);
                id
            }
            None => {
                self.arena.push(Some(note));
                self.arena.len() - 1
            }
        };
        let index = self.index_mut(state);
        index.by_key.insert(note.key, id);
        index.by_order.insert(note.order, id);
        index.by_slot.insert(note.slot, id);
        Ok(())
    }

    fn unlink(&mut self, state: NoteState, id: NoteId) -> Option<ActiveNote> {
        let note = self.record(id)?;
        let index = self.index_mut(state);
        index.by_key.remove(&note.key);
        index.by_order.remove(&note.order);
        index.by_slot.remove(&note.slot);
        self.arena[id] = None;
        self.vacant.push(id);
        Some(note)
    }

    /// Look up a key in one state
    pub fn find(&self, state: NoteState, key: NoteKey) -> Option<ActiveNote> {
        let id = *self.index(state).by_key.get(&key)?;
        self.record(id)
    }

    /// Look up a key in sounding, then released, then held
    pub fn find_any(&self, key: NoteKey) -> Option<(NoteState, ActiveNote)> {
        NoteState::PRIORITY
            .iter()
            .find_map(|&state| self.find(state, key).map(|note| (state, note)))
    }

    /// Look up the note bound to a slot
    pub fn find_slot(&self, slot: Slot) -> Option<(NoteState, ActiveNote)> {
        NoteState::PRIORITY.iter().find_map(|&state| {
            let id = *self.index(state).by_slot.get(&slot)?;
            self.record(id).map(|note| (state, note))
        })
    }

    /// Remove a key from one state
    pub fn remove(&mut self, state: NoteState, key: NoteKey) -> Option<ActiveNote> {
        let id = *self.index(state).by_key.get(&key)?;
        self.unlink(state, id)
    }

    /// Remove whatever note is bound to `slot`
    pub fn remove_slot(&mut self, slot: Slot) -> Option<(NoteState, ActiveNote)> {
        let (state, note) = self.find_slot(slot)?;
        self.remove(state, note.key).map(|note| (state, note))
    }

    /// Move a note between states, keeping its record
    pub fn transfer(&mut self, key: NoteKey, from: NoteState, to: NoteState) -> Option<ActiveNote> {
        let id = *self.index(from).by_key.get(&key)?;
        let note = self.record(id)?;
        let source = self.index_mut(from);
        source.by_key.remove(&note.key);
        source.by_order.remove(&note.order);
        source.by_slot.remove(&note.slot);
        let target = self.index_mut(to);
        target.by_key.insert(note.key, id);
        target.by_order.insert(note.order, id);
        target.by_slot.insert(note.slot, id);
        Some(note)
    }

    /// The note with the lowest creation order across all states
    pub fn oldest(&self) -> Option<(NoteState, ActiveNote)> {
        NoteState::PRIORITY
            .iter()
            .filter_map(|&state| {
                let (_, &id) = self.index(state).by_order.first_key_value()?;
                self.record(id).map(|note| (state, note))
            })
            .min_by_key(|(_, note)| note.order)
    }

    /// Keys of one state that belong to `channel`
    pub fn keys_in_channel(&self, state: NoteState, channel: u8) -> Vec<NoteKey> {
        self.index(state)
            .by_key
            .range(NoteKey::channel_range(channel))
            .map(|(&key, _)| key)
            .collect()
    }

    /// Every tracked note of `channel`
    pub fn notes_in_channel(&self, channel: u8) -> Vec<ActiveNote> {
        NoteState::BROADCAST
            .iter()
            .flat_map(|&state| {
                self.index(state)
                    .by_key
                    .range(NoteKey::channel_range(channel))
                    .filter_map(|(_, &id)| self.record(id))
            })
            .collect()
    }

    /// Every tracked note
    pub fn notes(&self) -> Vec<ActiveNote> {
        NoteState::BROADCAST
            .iter()
            .flat_map(|&state| {
                self.index(state)
                    .by_key
                    .values()
                    .filter_map(|&id| self.record(id))
            })
            .collect()
    }

    /// Update the key pressure of a tracked note
    pub fn set_key_pressure(&mut self, key: NoteKey, pressure: u8) -> Option<ActiveNote> {
        let (state, _) = self.find_any(key)?;
        let id = *self.index(state).by_key.get(&key)?;
        let note = self.arena.get_mut(id)?.as_mut()?;
        note.key_pressure = pressure;
        Some(*note)
    }
}
