//! # In-Memory Repository
//!
//! Reference implementation of both store contracts backed by `DashMap`.
//!
//! `set_state` performs its compare-and-swap while holding the shard lock of
//! the machine's entry, so the tag comparison and the write are one
//! indivisible step with respect to every other writer.

use super::{NewMachine, SchematicStore, StatusStore, StoreError, StoreResult};
use crate::schematic::{MachineValue, Schematic};
use crate::status::{generate_machine_id, MachineStatus};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

pub struct InMemoryRepository<S, I> {
    machines: DashMap<String, MachineStatus<S>>,
    schematics: DashMap<String, Arc<Schematic<S, I>>>,
}

impl<S: MachineValue, I: MachineValue> InMemoryRepository<S, I> {
    pub fn new() -> Self {
        Self {
            machines: DashMap::new(),
            schematics: DashMap::new(),
        }
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn schematic_count(&self) -> usize {
        self.schematics.len()
    }

    fn insert_new(&self, request: NewMachine<S>) -> StoreResult<MachineStatus<S>> {
        let machine_id = request.machine_id.unwrap_or_else(generate_machine_id);

        match self.machines.entry(machine_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::MachineAlreadyExists { machine_id }),
            Entry::Vacant(vacant) => {
                let status = MachineStatus::initial(
                    machine_id,
                    request.schematic_name,
                    request.initial_state,
                    request.metadata,
                );
                vacant.insert(status.clone());
                Ok(status)
            }
        }
    }
}

impl<S: MachineValue, I: MachineValue> Default for InMemoryRepository<S, I> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: MachineValue, I: MachineValue> StatusStore<S> for InMemoryRepository<S, I> {
    async fn get_status(&self, machine_id: &str) -> StoreResult<MachineStatus<S>> {
        self.machines
            .get(machine_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::MachineNotFound {
                machine_id: machine_id.to_string(),
            })
    }

    async fn set_state(
        &self,
        machine_id: &str,
        state: S,
        state_bag_updates: Option<HashMap<String, String>>,
        expected_commit_tag: Uuid,
    ) -> StoreResult<MachineStatus<S>> {
        let mut entry = self
            .machines
            .get_mut(machine_id)
            .ok_or_else(|| StoreError::MachineNotFound {
                machine_id: machine_id.to_string(),
            })?;

        if entry.commit_tag != expected_commit_tag {
            trace!(
                machine_id,
                expected = %expected_commit_tag,
                actual = %entry.commit_tag,
                "Commit tag mismatch"
            );
            return Err(StoreError::StateConflict {
                machine_id: machine_id.to_string(),
                expected: expected_commit_tag,
                actual: entry.commit_tag,
            });
        }

        let next = entry.committed(state, state_bag_updates.as_ref());
        *entry = next.clone();

        Ok(next)
    }

    async fn create_machine(&self, request: NewMachine<S>) -> StoreResult<MachineStatus<S>> {
        let status = self.insert_new(request)?;
        debug!(
            machine_id = %status.machine_id,
            schematic = %status.schematic_name,
            "Machine created"
        );
        Ok(status)
    }

    async fn bulk_create_machines(
        &self,
        requests: Vec<NewMachine<S>>,
    ) -> StoreResult<Vec<MachineStatus<S>>> {
        let mut created: Vec<MachineStatus<S>> = Vec::with_capacity(requests.len());

        for request in requests {
            match self.insert_new(request) {
                Ok(status) => created.push(status),
                Err(error) => {
                    for status in &created {
                        self.machines.remove(&status.machine_id);
                    }
                    return Err(error);
                }
            }
        }

        debug!(count = created.len(), "Machines created in bulk");
        Ok(created)
    }

    async fn delete_machine(&self, machine_id: &str) -> StoreResult<()> {
        self.machines
            .remove(machine_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::MachineNotFound {
                machine_id: machine_id.to_string(),
            })
    }

    async fn list_machines(
        &self,
        schematic_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<MachineStatus<S>>> {
        let mut machines: Vec<MachineStatus<S>> = self
            .machines
            .iter()
            .filter(|entry| entry.schematic_name == schematic_name)
            .map(|entry| entry.value().clone())
            .collect();

        machines.sort_by(|a, b| {
            b.updated_time
                .cmp(&a.updated_time)
                .then_with(|| a.machine_id.cmp(&b.machine_id))
        });
        machines.truncate(limit);

        Ok(machines)
    }
}

#[async_trait]
impl<S: MachineValue, I: MachineValue> SchematicStore<S, I> for InMemoryRepository<S, I> {
    async fn store_schematic(
        &self,
        schematic: Schematic<S, I>,
    ) -> StoreResult<Arc<Schematic<S, I>>> {
        schematic.validate()?;

        match self.schematics.entry(schematic.name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().as_ref() == &schematic {
                    Ok(Arc::clone(existing.get()))
                } else {
                    Err(StoreError::SchematicAlreadyExists {
                        schematic_name: schematic.name,
                    })
                }
            }
            Entry::Vacant(vacant) => {
                let stored = Arc::new(schematic);
                vacant.insert(Arc::clone(&stored));
                debug!(schematic = %stored.name, states = stored.states.len(), "Schematic stored");
                Ok(stored)
            }
        }
    }

    async fn get_schematic(&self, schematic_name: &str) -> StoreResult<Arc<Schematic<S, I>>> {
        self.schematics
            .get(schematic_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::SchematicNotFound {
                schematic_name: schematic_name.to_string(),
            })
    }

    async fn list_schematics(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.schematics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}
