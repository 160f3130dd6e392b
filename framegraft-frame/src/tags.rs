//! The tag store: `(buffer type, viewport) → resource`, with clones for
//! volatile tags some loaded plugin needs later than the call that set
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use framegraft_core::types::{BufferType, ResourceLifecycle, ViewportHandle};
use framegraft_core::{Error, Result};
use framegraft_chi::compute::{transition_scoped, CommandList, Compute, RenderApi, ScopedTasks};
use framegraft_chi::pool::{HashedResource, ResourcePool};
use framegraft_chi::resource::{Extent, Resource, ResourceState, ResourceTransition};

/// Optional precision data chained after a motion-vector tag.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrecisionInfo {
    pub scale: f32,
    pub bias: f32,
}

/// A stored tag: the source resource plus an optional pool-owned clone.
/// Readers get the clone when one exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonResource {
    pub resource: Resource,
    pub extent: Extent,
    pub precision: PrecisionInfo,
    pub clone: Option<HashedResource>,
}

impl CommonResource {
    /// The resource a feature should actually read.
    pub fn effective(&self) -> &Resource {
        match &self.clone {
            Some(clone) => &clone.resource,
            None => &self.resource,
        }
    }
}

/// One tag as the host supplies it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTagEntry {
    pub tag_type: BufferType,
    pub resource: Resource,
    pub lifecycle: ResourceLifecycle,
    pub extent: Option<Extent>,
    pub precision: Option<PrecisionInfo>,
}

fn tag_uid(tag_type: BufferType, viewport: ViewportHandle) -> u64 {
    ((tag_type as u64) << 32) | viewport.0 as u64
}

fn tracking_id(tag_type: BufferType, viewport: ViewportHandle) -> u32 {
    ((tag_type as u32) << 16) | (viewport.0 & 0xffff)
}

pub struct TagStore {
    compute: Arc<dyn Compute>,
    pool: Arc<ResourcePool>,
    map: Mutex<HashMap<u64, CommonResource>>,
    required: Mutex<HashSet<(ViewportHandle, BufferType, ResourceLifecycle)>>,
}

impl TagStore {
    pub fn new(compute: Arc<dyn Compute>, pool: Arc<ResourcePool>) -> Self {
        Self {
            compute,
            pool,
            map: Mutex::new(HashMap::new()),
            required: Mutex::new(HashSet::new()),
        }
    }

    /// Seed the required set from manifest-declared tags; runtime
    /// requests add to it as features evaluate.
    pub fn require(
        &self,
        viewport: ViewportHandle,
        tag_type: BufferType,
        lifecycle: ResourceLifecycle,
    ) {
        self.required.lock().unwrap().insert((viewport, tag_type, lifecycle));
    }

    pub fn is_required(
        &self,
        viewport: ViewportHandle,
        tag_type: BufferType,
        lifecycle: ResourceLifecycle,
    ) -> bool {
        self.required.lock().unwrap().contains(&(viewport, tag_type, lifecycle))
    }

    /// Store one tag. `local` marks tags passed inside an evaluate's
    /// inputs; they live for that call only unless a clone was needed.
    pub fn set_tag(
        &self,
        viewport: ViewportHandle,
        entry: &ResourceTagEntry,
        cmd: Option<CommandList>,
        local: bool,
    ) -> Result<()> {
        let uid = tag_uid(entry.tag_type, viewport);
        let mut cr = CommonResource::default();

        if !entry.resource.is_null() {
            cr.resource = entry.resource.clone();
            if self.compute.render_api() == RenderApi::D3d11 {
                // Engine states are meaningless on the d3d11 compute path.
                cr.resource.desc.state = ResourceState::GENERAL;
            } else if entry.resource.desc.state.is_empty() {
                tracing::error!(
                    "resource state must be provided for '{}' tags",
                    entry.tag_type.as_str()
                );
                return Err(Error::MissingResourceState);
            }

            // Output tags are written into engine resources; a copy would
            // be written by nobody and read by nobody.
            let write_tag = entry.tag_type.is_output();
            if !write_tag && entry.lifecycle != ResourceLifecycle::ValidUntilPresent {
                let (required_on_present, required_on_evaluate) = {
                    let required = self.required.lock().unwrap();
                    (
                        required.contains(&(
                            viewport,
                            entry.tag_type,
                            ResourceLifecycle::ValidUntilPresent,
                        )),
                        required.contains(&(
                            viewport,
                            entry.tag_type,
                            ResourceLifecycle::ValidUntilEvaluate,
                        )),
                    )
                };
                // Required on present: always copy. Required on evaluate:
                // copy only a valid-only-now global set.
                let make_copy = required_on_present
                    || (required_on_evaluate
                        && entry.lifecycle == ResourceLifecycle::OnlyValidNow
                        && !local);
                if make_copy {
                    let Some(cmd) = cmd else {
                        tracing::error!("a command buffer is required when tagging volatile resources");
                        return Err(Error::MissingInputParameter);
                    };
                    let previous_clone = {
                        let map = self.map.lock().unwrap();
                        map.get(&uid).and_then(|prev| prev.clone.clone())
                    };
                    if let Some(previous) = previous_clone {
                        self.pool.recycle(&previous);
                    }
                    let clone = self
                        .pool
                        .allocate(
                            &entry.resource,
                            &format!("graft.tag.{}.volatile.{}", entry.tag_type.as_str(), viewport.0),
                        )
                        .map_err(Error::from)?;

                    let source_state = cr.resource.desc.state;
                    {
                        let mut reverse = ScopedTasks::new();
                        transition_scoped(
                            self.compute.as_ref(),
                            cmd,
                            &[ResourceTransition::new(
                                &entry.resource,
                                ResourceState::COPY_SOURCE,
                                source_state,
                            )],
                            &mut reverse,
                        )
                        .map_err(Error::from)?;
                        self.compute
                            .copy_resource(cmd, &clone.resource, &entry.resource)
                            .map_err(Error::from)?;
                        // reverse transitions run here
                    }
                    cr.clone = Some(clone);
                }
            }
        }

        if let Some(extent) = entry.extent {
            cr.extent = extent;
        }
        if let Some(precision) = entry.precision {
            cr.precision = precision;
        }

        if cr.clone.is_none() {
            // A local tag that needed no copy is consumed by the current
            // evaluate and never stored.
            if local {
                return Ok(());
            }
            if !cr.resource.is_null() {
                self.compute
                    .start_tracking_resource(tracking_id(entry.tag_type, viewport), &cr.resource);
            } else {
                self.compute.stop_tracking_resource(tracking_id(entry.tag_type, viewport));
            }
        }

        let mut map = self.map.lock().unwrap();
        if let Some(previous) = map.get(&uid) {
            // Null tags and lifecycle changes must give their copies back.
            if let (Some(previous_clone), None) = (&previous.clone, &cr.clone) {
                self.pool.recycle(previous_clone);
            }
        }
        map.insert(uid, cr);
        Ok(())
    }

    /// Fetch a tag, preferring evaluate-local inputs over the global
    /// store, and record the request in the required set. Requests made
    /// during evaluate register `ValidUntilEvaluate`; requests from hooks
    /// (present and friends) register `ValidUntilPresent`.
    pub fn get_tag(
        &self,
        viewport: ViewportHandle,
        tag_type: BufferType,
        local_inputs: Option<&[ResourceTagEntry]>,
        during_evaluate: bool,
    ) -> CommonResource {
        if let Some(inputs) = local_inputs {
            if let Some(entry) = inputs.iter().find(|t| t.tag_type == tag_type) {
                self.require(viewport, tag_type, ResourceLifecycle::ValidUntilEvaluate);
                return CommonResource {
                    resource: entry.resource.clone(),
                    extent: entry.extent.unwrap_or_default(),
                    precision: entry.precision.unwrap_or_default(),
                    clone: None,
                };
            }
        }
        let lifecycle = if during_evaluate {
            ResourceLifecycle::ValidUntilEvaluate
        } else {
            ResourceLifecycle::ValidUntilPresent
        };
        self.require(viewport, tag_type, lifecycle);
        self.map
            .lock()
            .unwrap()
            .get(&tag_uid(tag_type, viewport))
            .cloned()
            .unwrap_or_default()
    }

    /// Recycle every clone; called on viewport destruction and shutdown.
    pub fn clear(&self) {
        let mut map = self.map.lock().unwrap();
        for (_, cr) in map.drain() {
            if let Some(clone) = cr.clone {
                self.pool.recycle(&clone);
            }
        }
    }
}
