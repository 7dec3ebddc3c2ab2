use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools as _;
use tracing::debug;
use types::base::{TaskId, WorkerAddress, WorkerId};
use types::object::{ObjectId, ObjectReference};

use crate::metrics::DependencyManagerMetrics;
use crate::object_manager::ObjectManager;
use crate::reconstruction_policy::ReconstructionPolicy;

/// Get-subscription state of a single task: the objects it needs before it
/// can run, and how many of them are not yet local.
#[derive(Debug, Default)]
struct TaskDependencies {
    get_dependencies: BTreeSet<ObjectId>,
    num_missing_get_dependencies: usize,
}

/// Reverse-index entry for one needed object: who blocks on it, plus the
/// address of the worker authoritative for it.
#[derive(Debug)]
struct ObjectDependencies {
    /// Recorded from the first reference seen for the object. Later
    /// references do not overwrite it.
    owner_address: WorkerAddress,
    /// Subscribed tasks that need the object locally before they can run.
    dependent_tasks: BTreeSet<TaskId>,
    /// Workers with a wait-any subscription on the object.
    dependent_workers: BTreeSet<WorkerId>,
}

impl ObjectDependencies {
    fn new(owner_address: WorkerAddress) -> Self {
        Self {
            owner_address,
            dependent_tasks: BTreeSet::new(),
            dependent_workers: BTreeSet::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.dependent_tasks.is_empty() && self.dependent_workers.is_empty()
    }
}

/// Tracks, for every subscribed task and worker on this node, which remote
/// objects are still missing, and drives the object transport and
/// reconstruction seams to make missing objects appear. When objects
/// materialize or disappear, the object event handlers report which tasks
/// have just become runnable or must be parked again.
///
/// Every operation is synchronous and non-suspending; the enclosing node
/// serializes them under its own mutex. Outbound calls to the collaborators
/// are made while that mutex is held, so collaborators must not call back in
/// synchronously.
pub struct DependencyManager {
    object_manager: Arc<dyn ObjectManager>,
    reconstruction_policy: Arc<dyn ReconstructionPolicy>,
    metrics: Arc<DependencyManagerMetrics>,

    /// Objects currently materialized in the local store.
    local_objects: HashSet<ObjectId>,
    /// Per subscribed task, the objects it waits on.
    task_dependencies: HashMap<TaskId, TaskDependencies>,
    /// Per worker with a wait-any subscription, the remote objects it waits
    /// on. Entries shrink as objects become local.
    worker_dependencies: HashMap<WorkerId, BTreeSet<ObjectId>>,
    /// For every object some subscriber needs, keyed by the task that
    /// creates it: the dependents plus the object's owner address.
    required_tasks: HashMap<TaskId, BTreeMap<ObjectId, ObjectDependencies>>,
    /// Objects with an outstanding pull and reconstruction listen. Commands
    /// to the collaborators are issued exactly on entry to and exit from
    /// this set.
    required_objects: HashSet<ObjectId>,
    /// Creating tasks expected to (re-)execute on this node, whose outputs
    /// will appear locally without transport.
    pending_tasks: HashSet<TaskId>,
}

impl DependencyManager {
    pub fn new(
        object_manager: Arc<dyn ObjectManager>,
        reconstruction_policy: Arc<dyn ReconstructionPolicy>,
        metrics: Arc<DependencyManagerMetrics>,
    ) -> Self {
        Self {
            object_manager,
            reconstruction_policy,
            metrics,
            local_objects: HashSet::new(),
            task_dependencies: HashMap::new(),
            worker_dependencies: HashMap::new(),
            required_tasks: HashMap::new(),
            required_objects: HashSet::new(),
            pending_tasks: HashSet::new(),
        }
    }

    /// Whether the object is materialized in the local store.
    pub fn check_object_local(&self, object_id: &ObjectId) -> bool {
        self.local_objects.contains(object_id)
    }

    // Returns the owner address to fetch from when the object has to be made
    // local: some subscriber needs it, it is not local, and its creating
    // task is not expected to execute here.
    fn check_object_required(&self, object_id: &ObjectId) -> Option<WorkerAddress> {
        let creating_task_id = object_id.creator_task_id();
        let object_entry = self.required_tasks.get(&creating_task_id)?.get(object_id)?;
        if self.local_objects.contains(object_id) {
            return None;
        }
        if self.pending_tasks.contains(&creating_task_id) {
            return None;
        }
        Some(object_entry.owner_address.clone())
    }

    // Starts the pull and the reconstruction listen on the transition into
    // the required set. No-op if the object is not required or the commands
    // are already outstanding.
    fn handle_remote_dependency_required(&mut self, object_id: ObjectId) {
        let Some(owner_address) = self.check_object_required(&object_id) else {
            return;
        };
        if self.required_objects.insert(object_id) {
            debug!("Requesting remote object {object_id}");
            self.object_manager
                .pull(object_id, &owner_address)
                .unwrap_or_else(|err| {
                    panic!("failed to request pull of object {object_id}: {err}")
                });
            self.reconstruction_policy
                .listen_and_maybe_reconstruct(object_id, &owner_address);
        }
    }

    // Cancels the pull and the reconstruction listen on the transition out
    // of the required set. No-op if the object is still required or nothing
    // is outstanding.
    fn handle_remote_dependency_canceled(&mut self, object_id: ObjectId) {
        if self.check_object_required(&object_id).is_some() {
            return;
        }
        if self.required_objects.remove(&object_id) {
            debug!("Canceling remote object request for {object_id}");
            self.object_manager.cancel_pull(object_id);
            self.reconstruction_policy.cancel(object_id);
        }
    }

    /// Subscribe `task_id` to the objects it needs locally before it can
    /// run. Returns whether all of them are already local. References
    /// already tracked for the task are no-ops; callers changing a task's
    /// dependency set must unsubscribe first.
    pub fn subscribe_get_dependencies(
        &mut self,
        task_id: TaskId,
        required_objects: &[ObjectReference],
    ) -> bool {
        let task_entry = self.task_dependencies.entry(task_id).or_default();

        for reference in required_objects {
            let object_id = reference.object_id;
            if task_entry.get_dependencies.insert(object_id) {
                debug!("Task {task_id} blocked on object {object_id}");
                if !self.local_objects.contains(&object_id) {
                    task_entry.num_missing_get_dependencies += 1;
                }
                self.required_tasks
                    .entry(object_id.creator_task_id())
                    .or_default()
                    .entry(object_id)
                    .or_insert_with(|| ObjectDependencies::new(reference.owner_address.clone()))
                    .dependent_tasks
                    .insert(task_id);
            }
        }

        for reference in required_objects {
            self.handle_remote_dependency_required(reference.object_id);
        }

        self.task_dependencies[&task_id].num_missing_get_dependencies == 0
    }

    /// Subscribe `worker_id` to be notified when any of the referenced
    /// objects becomes local. References that are already local are dropped:
    /// the wait can already return them.
    pub fn subscribe_wait_dependencies(
        &mut self,
        worker_id: WorkerId,
        required_objects: &[ObjectReference],
    ) {
        let worker_entry = self.worker_dependencies.entry(worker_id).or_default();

        for reference in required_objects {
            let object_id = reference.object_id;
            if self.local_objects.contains(&object_id) {
                continue;
            }
            if worker_entry.insert(object_id) {
                debug!("Worker {worker_id} waiting on remote object {object_id}");
                self.required_tasks
                    .entry(object_id.creator_task_id())
                    .or_default()
                    .entry(object_id)
                    .or_insert_with(|| ObjectDependencies::new(reference.owner_address.clone()))
                    .dependent_workers
                    .insert(worker_id);
            }
        }

        for reference in required_objects {
            self.handle_remote_dependency_required(reference.object_id);
        }
    }

    // Unlinks one task from the reverse-index entry of `object_id`,
    // dropping the entry (and the creating-task entry) once nothing depends
    // on the object anymore.
    fn unlink_dependent_task(&mut self, object_id: &ObjectId, task_id: &TaskId) {
        let creating_task_id = object_id.creator_task_id();
        let creating_task_entry = self
            .required_tasks
            .get_mut(&creating_task_id)
            .unwrap_or_else(|| panic!("no required entry for creator of object {object_id}"));
        let object_entry = creating_task_entry
            .get_mut(object_id)
            .unwrap_or_else(|| panic!("no required entry for object {object_id}"));
        assert!(
            object_entry.dependent_tasks.remove(task_id),
            "task {task_id} was not linked to object {object_id}"
        );
        if object_entry.is_empty() {
            creating_task_entry.remove(object_id);
            if creating_task_entry.is_empty() {
                self.required_tasks.remove(&creating_task_id);
            }
        }
    }

    // Symmetric to `unlink_dependent_task` for wait subscriptions.
    fn unlink_dependent_worker(&mut self, object_id: &ObjectId, worker_id: &WorkerId) {
        let creating_task_id = object_id.creator_task_id();
        let creating_task_entry = self
            .required_tasks
            .get_mut(&creating_task_id)
            .unwrap_or_else(|| panic!("no required entry for creator of object {object_id}"));
        let object_entry = creating_task_entry
            .get_mut(object_id)
            .unwrap_or_else(|| panic!("no required entry for object {object_id}"));
        assert!(
            object_entry.dependent_workers.remove(worker_id),
            "worker {worker_id} was not linked to object {object_id}"
        );
        if object_entry.is_empty() {
            creating_task_entry.remove(object_id);
            if creating_task_entry.is_empty() {
                self.required_tasks.remove(&creating_task_id);
            }
        }
    }

    /// Drop `task_id`'s get subscription and cancel any requests that no
    /// longer have a subscriber. Returns whether the task was subscribed.
    pub fn unsubscribe_get_dependencies(&mut self, task_id: TaskId) -> bool {
        let Some(task_entry) = self.task_dependencies.remove(&task_id) else {
            return false;
        };
        debug!("Task {task_id} no longer blocked");

        for object_id in &task_entry.get_dependencies {
            self.unlink_dependent_task(object_id, &task_id);
        }
        for object_id in &task_entry.get_dependencies {
            self.handle_remote_dependency_canceled(*object_id);
        }

        true
    }

    /// Drop `worker_id`'s wait subscription and cancel any requests that no
    /// longer have a subscriber.
    pub fn unsubscribe_wait_dependencies(&mut self, worker_id: WorkerId) {
        let Some(worker_entry) = self.worker_dependencies.remove(&worker_id) else {
            return;
        };
        debug!("Worker {worker_id} no longer waiting");

        for object_id in &worker_entry {
            self.unlink_dependent_worker(object_id, &worker_id);
        }
        for object_id in &worker_entry {
            self.handle_remote_dependency_canceled(*object_id);
        }
    }

    /// Record that `object_id` has materialized in the local store. Returns
    /// the tasks whose last missing dependency this was, in other words the
    /// tasks that have just become runnable.
    pub fn handle_object_local(&mut self, object_id: ObjectId) -> Vec<TaskId> {
        assert!(
            self.local_objects.insert(object_id),
            "object {object_id} was already local"
        );

        let mut ready_task_ids = Vec::new();
        let creating_task_id = object_id.creator_task_id();
        if let Some(creating_task_entry) = self.required_tasks.get_mut(&creating_task_id) {
            if let Some(object_entry) = creating_task_entry.get_mut(&object_id) {
                for dependent_task_id in &object_entry.dependent_tasks {
                    let task_entry = self
                        .task_dependencies
                        .get_mut(dependent_task_id)
                        .unwrap_or_else(|| {
                            panic!("no dependency entry for subscribed task {dependent_task_id}")
                        });
                    task_entry.num_missing_get_dependencies -= 1;
                    if task_entry.num_missing_get_dependencies == 0 {
                        ready_task_ids.push(*dependent_task_id);
                    }
                }

                // A wait on a now-local object is satisfied, so the workers'
                // tracking of it is dropped here rather than on unsubscribe.
                for waiting_worker_id in &object_entry.dependent_workers {
                    let worker_entry = self
                        .worker_dependencies
                        .get_mut(waiting_worker_id)
                        .unwrap_or_else(|| {
                            panic!("no dependency entry for subscribed worker {waiting_worker_id}")
                        });
                    assert!(
                        worker_entry.remove(&object_id),
                        "worker {waiting_worker_id} was not waiting on object {object_id}"
                    );
                }
                object_entry.dependent_workers.clear();

                if object_entry.is_empty() {
                    creating_task_entry.remove(&object_id);
                    if creating_task_entry.is_empty() {
                        self.required_tasks.remove(&creating_task_id);
                    }
                }
            }
        }

        // The object no longer has to be fetched.
        self.handle_remote_dependency_canceled(object_id);

        ready_task_ids
    }

    /// Record that `object_id` has disappeared from the local store. Returns
    /// the tasks that were runnable and now have to wait again. Workers are
    /// not re-registered: a wait that resolved is consumed.
    pub fn handle_object_missing(&mut self, object_id: ObjectId) -> Vec<TaskId> {
        assert!(
            self.local_objects.remove(&object_id),
            "object {object_id} was not local"
        );

        let mut waiting_task_ids = Vec::new();
        let creating_task_id = object_id.creator_task_id();
        if let Some(creating_task_entry) = self.required_tasks.get_mut(&creating_task_id) {
            if let Some(object_entry) = creating_task_entry.get_mut(&object_id) {
                for dependent_task_id in &object_entry.dependent_tasks {
                    let task_entry = self
                        .task_dependencies
                        .get_mut(dependent_task_id)
                        .unwrap_or_else(|| {
                            panic!("no dependency entry for subscribed task {dependent_task_id}")
                        });
                    if task_entry.num_missing_get_dependencies == 0 {
                        waiting_task_ids.push(*dependent_task_id);
                    }
                    task_entry.num_missing_get_dependencies += 1;
                }
            }
        }

        // The object is remote again; fetch it if anyone still needs it.
        self.handle_remote_dependency_required(object_id);

        waiting_task_ids
    }

    /// Signal that creating task `task_id` will (re-)execute on this node,
    /// so its outputs will appear locally without transport. Whether a
    /// creating task qualifies is the caller's policy; the signal is applied
    /// unconditionally here.
    pub fn task_pending(&mut self, task_id: TaskId) {
        debug!("Task execution {task_id} pending");
        if !self.pending_tasks.insert(task_id) {
            return;
        }

        // Any in-flight requests for the task's outputs are superfluous now.
        let Some(creating_task_entry) = self.required_tasks.get(&task_id) else {
            return;
        };
        let object_ids: Vec<_> = creating_task_entry.keys().copied().collect();
        for object_id in object_ids {
            self.handle_remote_dependency_canceled(object_id);
        }
    }

    /// Signal that creating task `task_id` will no longer execute on this
    /// node. Its outputs are remote again for any remaining subscribers.
    pub fn task_canceled(&mut self, task_id: TaskId) {
        debug!("Task execution {task_id} canceled");
        if !self.pending_tasks.remove(&task_id) {
            return;
        }

        let Some(creating_task_entry) = self.required_tasks.get(&task_id) else {
            return;
        };
        let object_ids: Vec<_> = creating_task_entry.keys().copied().collect();
        for object_id in object_ids {
            self.handle_remote_dependency_required(object_id);
        }
    }

    /// Bulk-remove subscribed tasks together with every object they were
    /// subscribed to. The caller must include all subscribers of the outputs
    /// of any removed task; a removed task left with dependents afterwards
    /// is a consistency failure.
    pub fn remove_tasks_and_related_objects(&mut self, task_ids: &HashSet<TaskId>) {
        debug!(
            "Removing tasks: {}",
            task_ids.iter().map(|task_id| task_id.to_string()).join(",")
        );

        // Collect the unique objects the removed tasks were subscribed to.
        let mut removed_objects = HashSet::new();
        for task_id in task_ids {
            if let Some(task_entry) = self.task_dependencies.remove(task_id) {
                removed_objects.extend(task_entry.get_dependencies.iter().copied());
            }
            self.pending_tasks.remove(task_id);
        }

        for object_id in &removed_objects {
            self.required_tasks.remove(&object_id.creator_task_id());
        }
        for object_id in removed_objects {
            self.handle_remote_dependency_canceled(object_id);
        }

        for task_id in task_ids {
            assert!(
                !self.required_tasks.contains_key(task_id),
                "task {task_id} was removed but another task depending on its outputs was not"
            );
        }
    }

    /// Owner address recorded for `object_id`, if any subscription has
    /// recorded one that names a concrete worker.
    pub fn get_owner_address(&self, object_id: &ObjectId) -> Option<WorkerAddress> {
        let object_entry = self
            .required_tasks
            .get(&object_id.creator_task_id())?
            .get(object_id)?;
        object_entry
            .owner_address
            .has_worker_id()
            .then(|| object_entry.owner_address.clone())
    }

    /// Multi-line summary of the index sizes for the node's debug dump.
    pub fn debug_string(&self) -> String {
        format!(
            "DependencyManager:\
             \n- task dep map size: {}\
             \n- task req map size: {}\
             \n- req objects map size: {}\
             \n- local objects map size: {}\
             \n- pending tasks map size: {}",
            self.task_dependencies.len(),
            self.required_tasks.len(),
            self.required_objects.len(),
            self.local_objects.len(),
            self.pending_tasks.len(),
        )
    }

    /// Publish the current index sizes as gauges.
    pub fn record_metrics(&self) {
        self.metrics
            .num_subscribed_tasks
            .set(self.task_dependencies.len() as i64);
        self.metrics
            .num_required_tasks
            .set(self.required_tasks.len() as i64);
        self.metrics
            .num_required_objects
            .set(self.required_objects.len() as i64);
        self.metrics
            .num_pending_tasks
            .set(self.pending_tasks.len() as i64);
    }

    /// Whether no subscriptions, outstanding requests, or pending tasks
    /// remain.
    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.task_dependencies.is_empty()
            && self.worker_dependencies.is_empty()
            && self.required_tasks.is_empty()
            && self.required_objects.is_empty()
            && self.pending_tasks.is_empty()
    }

    /// Re-derives every cross-index invariant from scratch.
    #[cfg(test)]
    fn assert_consistent(&self) {
        for (task_id, task_entry) in &self.task_dependencies {
            let num_missing = task_entry
                .get_dependencies
                .iter()
                .filter(|object_id| !self.local_objects.contains(object_id))
                .count();
            assert_eq!(
                task_entry.num_missing_get_dependencies, num_missing,
                "missing count of task {task_id} does not match its dependencies"
            );
            for object_id in &task_entry.get_dependencies {
                let object_entry = self
                    .required_tasks
                    .get(&object_id.creator_task_id())
                    .and_then(|objects| objects.get(object_id))
                    .unwrap_or_else(|| {
                        panic!("object {object_id} of task {task_id} is not reverse-indexed")
                    });
                assert!(
                    object_entry.dependent_tasks.contains(task_id),
                    "task {task_id} is not a recorded dependent of object {object_id}"
                );
            }
        }

        for (worker_id, worker_entry) in &self.worker_dependencies {
            for object_id in worker_entry {
                let object_entry = self
                    .required_tasks
                    .get(&object_id.creator_task_id())
                    .and_then(|objects| objects.get(object_id))
                    .unwrap_or_else(|| {
                        panic!("object {object_id} of worker {worker_id} is not reverse-indexed")
                    });
                assert!(
                    object_entry.dependent_workers.contains(worker_id),
                    "worker {worker_id} is not a recorded dependent of object {object_id}"
                );
            }
        }

        let mut derived_required = HashSet::new();
        for (creating_task_id, objects) in &self.required_tasks {
            assert!(
                !objects.is_empty(),
                "empty object map kept for creating task {creating_task_id}"
            );
            for (object_id, object_entry) in objects {
                assert_eq!(object_id.creator_task_id(), *creating_task_id);
                assert!(
                    !object_entry.is_empty(),
                    "entry without dependents kept for object {object_id}"
                );
                for task_id in &object_entry.dependent_tasks {
                    let forward = self.task_dependencies.get(task_id).unwrap_or_else(|| {
                        panic!("dependent task {task_id} of object {object_id} is not subscribed")
                    });
                    assert!(forward.get_dependencies.contains(object_id));
                }
                for worker_id in &object_entry.dependent_workers {
                    let forward = self.worker_dependencies.get(worker_id).unwrap_or_else(|| {
                        panic!("dependent worker {worker_id} of object {object_id} is not subscribed")
                    });
                    assert!(forward.contains(object_id));
                    assert!(
                        !self.local_objects.contains(object_id),
                        "worker {worker_id} is listed against local object {object_id}"
                    );
                }
                if !self.local_objects.contains(object_id)
                    && !self.pending_tasks.contains(creating_task_id)
                {
                    derived_required.insert(*object_id);
                }
            }
        }
        assert_eq!(
            derived_required, self.required_objects,
            "required object set does not match the subscription state"
        );
        assert!(
            self.required_objects.is_disjoint(&self.local_objects),
            "an object is both local and required"
        );
    }
}
