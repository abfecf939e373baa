//! Collection fan-out.
//!
//! When a job whose body supports fan-out receives a collection on one or
//! more input properties, the collection is unrolled: one child job per member
//! index, each child seeing member `i` of every collection input. The member
//! outputs are gathered back into fresh collections bound to the parent's
//! output properties.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::child::ChildJobOrchestrator;
use crate::config::RetryConfig;
use crate::data::{DataObjectHandle, LockManager, LockMode, LockSet, LockTicket};
use crate::error::ExecutionError;
use crate::history::HistoryRecord;
use crate::logging::Logger;
use crate::property::{DataRef, Direction, PropertyRegistry, ValueKind};

/// Opt-in for collection fan-out, with a hook for naming member outputs.
pub trait SupportsGroupFanOut {
    /// Name given to the output of member `index` for the output property
    /// `property`, whose requested name is `output_name`.
    fn member_output_name(&self, _property: &str, output_name: &str, index: usize) -> String {
        format!("{output_name}_{}", index + 1)
    }
}

/// Fan-out with the default member naming.
pub struct DefaultFanOut;

impl SupportsGroupFanOut for DefaultFanOut {}

pub static DEFAULT_FAN_OUT: DefaultFanOut = DefaultFanOut;

/// Which properties carry collections and how many members each has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub properties: Vec<String>,
    pub member_count: usize,
}

impl GroupPlan {
    pub fn covers(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    /// Every object reachable from the unrolled collections, members included.
    pub fn fanned_objects(&self, props: &PropertyRegistry) -> HashSet<DataObjectHandle> {
        props
            .iter()
            .filter(|p| self.covers(p.name()))
            .filter_map(|p| p.data_handle())
            .flat_map(DataObjectHandle::flatten)
            .collect()
    }
}

fn lock_mode(direction: Direction) -> LockMode {
    if direction.is_output() {
        LockMode::Write
    } else {
        LockMode::Read
    }
}

/// Read tickets for inputs, write tickets for outputs, over every property
/// the plan does not unroll. Collections are locked with all their members.
pub(crate) fn shared_tickets(props: &PropertyRegistry, plan: Option<&GroupPlan>) -> Vec<LockTicket> {
    let mut tickets = Vec::new();
    for p in props.iter() {
        let Some(handle) = p.data_handle() else {
            continue;
        };
        if plan.is_some_and(|plan| plan.covers(p.name())) {
            continue;
        }
        let mode = lock_mode(p.direction());
        tickets.extend(
            handle
                .flatten()
                .into_iter()
                .map(|object| LockTicket { object, mode }),
        );
    }
    tickets
}

/// A member that failed while the job continued with the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberFailure {
    pub index: usize,
    pub error: String,
}

struct CollectionInput {
    property: String,
    direction: Direction,
    members: Vec<DataObjectHandle>,
}

struct OutputSlot {
    property: String,
    name: String,
}

/// What every member iteration of one run shares.
struct Unrolled {
    collections: Vec<CollectionInput>,
    outputs: Vec<OutputSlot>,
    /// Shared tickets on objects that also sit inside a collection.
    overlap: Vec<LockTicket>,
}

pub struct GroupExpander<'a> {
    pub(crate) job_name: &'a str,
    pub(crate) version: u32,
    pub(crate) orchestrator: &'a ChildJobOrchestrator,
    pub(crate) fan_out: &'a dyn SupportsGroupFanOut,
    /// `None` when an ancestor already holds the locks.
    pub(crate) locks: Option<&'a Arc<LockManager>>,
    pub(crate) retry: &'a RetryConfig,
    pub(crate) continue_on_member_failure: bool,
    pub(crate) logger: &'a Logger,
    pub(crate) cancel: &'a CancellationToken,
}

impl GroupExpander<'_> {
    /// Finds the collection inputs. `None` means the job runs its own body.
    ///
    /// Every collection input must have the same, non-zero member count.
    pub fn plan(props: &PropertyRegistry) -> Result<Option<GroupPlan>, ExecutionError> {
        let mut sizes: Vec<(String, usize)> = Vec::new();
        for p in props.iter().filter(|p| p.direction().is_input()) {
            let Some(count) = p.data_handle().and_then(DataObjectHandle::member_count) else {
                continue;
            };
            if count == 0 {
                return Err(ExecutionError::EmptyCollection(p.name().to_string()));
            }
            sizes.push((p.name().to_string(), count));
        }

        let Some(&(_, member_count)) = sizes.first() else {
            return Ok(None);
        };
        if sizes.iter().any(|(_, count)| *count != member_count) {
            return Err(ExecutionError::GroupSizeMismatch { sizes });
        }
        Ok(Some(GroupPlan {
            properties: sizes.into_iter().map(|(name, _)| name).collect(),
            member_count,
        }))
    }

    /// Runs one child per member and binds the reassembled outputs on `props`.
    pub fn run(
        &self,
        plan: &GroupPlan,
        props: &mut PropertyRegistry,
        record: &mut HistoryRecord,
    ) -> Result<Vec<MemberFailure>, ExecutionError> {
        let collections = plan
            .properties
            .iter()
            .map(|name| {
                let p = props.property(name)?;
                Ok(CollectionInput {
                    property: name.clone(),
                    direction: p.direction(),
                    members: p.data_handle().map(DataObjectHandle::members).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, ExecutionError>>()?;

        let outputs: Vec<OutputSlot> = props
            .iter()
            .filter(|p| p.kind() == ValueKind::Data)
            .filter(|p| match p.direction() {
                Direction::Output => true,
                Direction::InOut => plan.covers(p.name()),
                Direction::Input => false,
            })
            .filter_map(|p| {
                let data = p.value().as_data()?;
                (!data.name().is_empty()).then(|| OutputSlot {
                    property: p.name().to_string(),
                    name: data.name().to_string(),
                })
            })
            .collect();

        // Shared objects that also sit inside an unrolled collection are
        // locked together with each member, so one request can fold a read
        // into the member's write.
        let fanned = plan.fanned_objects(props);
        let overlap: Vec<LockTicket> = shared_tickets(props, Some(plan))
            .into_iter()
            .filter(|t| fanned.contains(&t.object))
            .collect();

        let unrolled = Unrolled {
            collections,
            outputs,
            overlap,
        };
        let n = plan.member_count;
        let mut assembled: Vec<Vec<DataObjectHandle>> = vec![Vec::new(); unrolled.outputs.len()];
        let mut failures = Vec::new();

        for index in 0..n {
            if self.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            let start = index as f64 / n as f64;
            let end = (index + 1) as f64 / n as f64;

            match self.run_member(index, (start, end), props, &unrolled, record) {
                Ok(produced) => {
                    for (slot, handle) in produced {
                        assembled[slot].push(handle);
                    }
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) if self.continue_on_member_failure => {
                    self.logger
                        .warning(&format!("member {} of {n} failed, continuing: {e}", index + 1));
                    failures.push(MemberFailure {
                        index,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    self.logger
                        .error(&format!("member {} of {n} failed: {e}", index + 1));
                    return Err(e);
                }
            }
        }

        if failures.len() == n {
            return Err(ExecutionError::Body(anyhow!("all {n} collection members failed")));
        }

        for (slot, members) in unrolled.outputs.iter().zip(assembled) {
            let collection = DataObjectHandle::collection(slot.name.clone(), members);
            props.set(&slot.property, DataRef::bound(slot.name.clone(), collection))?;
        }
        Ok(failures)
    }

    fn run_member(
        &self,
        index: usize,
        (start, end): (f64, f64),
        props: &PropertyRegistry,
        unrolled: &Unrolled,
        record: &mut HistoryRecord,
    ) -> Result<Vec<(usize, DataObjectHandle)>, ExecutionError> {
        let mut child = self
            .orchestrator
            .spawn(self.job_name, self.version, start, end, true)?;

        for p in props.iter().filter(|p| !p.is_default()) {
            if let Some(collection) = unrolled.collections.iter().find(|c| c.property == p.name()) {
                child.set_property(p.name(), collection.members[index].clone())?;
            } else if let Some(slot) = unrolled.outputs.iter().find(|o| o.property == p.name()) {
                let name = self.fan_out.member_output_name(p.name(), &slot.name, index);
                child.set_property(p.name(), DataRef::named(name))?;
            } else if p.direction().is_input() {
                child.set_property(p.name(), p.value().clone())?;
            }
        }

        let _member_locks = match self.locks {
            Some(locks) => Some(self.lock_member(locks, index, unrolled)?),
            None => None,
        };

        self.orchestrator.run(&mut child, record)?;

        Ok(unrolled
            .outputs
            .iter()
            .enumerate()
            .filter_map(|(slot, o)| {
                child
                    .properties()
                    .get_data(&o.property)
                    .ok()
                    .map(|handle| (slot, handle))
            })
            .collect())
    }

    /// Locks member `index` of every collection plus `overlap`, retrying with
    /// backoff while another job holds any of them.
    fn lock_member(
        &self,
        locks: &Arc<LockManager>,
        index: usize,
        unrolled: &Unrolled,
    ) -> Result<LockSet, ExecutionError> {
        let mut tickets: Vec<LockTicket> = unrolled
            .collections
            .iter()
            .flat_map(|c| {
                let mode = lock_mode(c.direction);
                c.members[index]
                    .flatten()
                    .into_iter()
                    .map(move |object| LockTicket { object, mode })
            })
            .collect();
        tickets.extend_from_slice(&unrolled.overlap);

        let mut attempt = 0;
        loop {
            match locks.acquire(&tickets) {
                Ok(set) => return Ok(set),
                Err(busy) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    self.logger.debug(&format!(
                        "member {}: {busy}; retry {attempt}/{} in {delay:?}",
                        index + 1,
                        self.retry.max_retries
                    ));
                    std::thread::sleep(delay);
                    if self.cancel.is_cancelled() {
                        return Err(ExecutionError::Cancelled);
                    }
                }
                Err(busy) => return Err(busy.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::DataMode;
    use serde_json::json;

    fn registry() -> PropertyRegistry {
        let mut props = PropertyRegistry::new();
        props
            .declare_data("A", Direction::Input, DataMode::Mandatory)
            .unwrap();
        props
            .declare_data("B", Direction::Input, DataMode::Optional)
            .unwrap();
        props
            .declare_data("Out", Direction::Output, DataMode::Optional)
            .unwrap();
        props
    }

    fn collection(name: &str, n: usize) -> DataObjectHandle {
        let members = (0..n)
            .map(|i| DataObjectHandle::new(format!("{name}{i}"), json!(i)))
            .collect();
        DataObjectHandle::collection(name, members)
    }

    #[test]
    fn single_objects_do_not_fan_out() {
        let mut props = registry();
        props
            .set("A", DataObjectHandle::new("a", json!(1)))
            .unwrap();
        assert_eq!(GroupExpander::plan(&props).unwrap(), None);
    }

    #[test]
    fn matching_collections_are_planned_together() {
        let mut props = registry();
        props.set("A", collection("a", 3)).unwrap();
        props.set("B", collection("b", 3)).unwrap();
        let plan = GroupExpander::plan(&props).unwrap().unwrap();
        assert_eq!(plan.member_count, 3);
        assert!(plan.covers("A") && plan.covers("B"));
        assert!(!plan.covers("Out"));
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let mut props = registry();
        props.set("A", collection("a", 2)).unwrap();
        props.set("B", collection("b", 3)).unwrap();
        match GroupExpander::plan(&props) {
            Err(ExecutionError::GroupSizeMismatch { sizes }) => {
                assert_eq!(sizes, vec![("A".to_string(), 2), ("B".to_string(), 3)]);
            }
            other => panic!("expected size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn empty_collections_are_rejected() {
        let mut props = registry();
        props.set("A", collection("a", 0)).unwrap();
        assert!(matches!(
            GroupExpander::plan(&props),
            Err(ExecutionError::EmptyCollection(name)) if name == "A"
        ));
    }

    #[test]
    fn default_member_names_are_one_based() {
        assert_eq!(DEFAULT_FAN_OUT.member_output_name("Out", "scaled", 0), "scaled_1");
        assert_eq!(DEFAULT_FAN_OUT.member_output_name("Out", "scaled", 4), "scaled_5");
    }
}
