//! The workflow graph: activities connected by data and control edges.

mod edge;
mod merger;

pub use edge::{Edge, EdgeKind, EdgeState};
pub use merger::{ControlStateMerger, DataStateMerger};

use crate::activity::{ActivityConfig, ActivityId, ActivityState, ActivityWrapper};
use crate::error::{ActivityResult, WorkflowError};
use crate::model::{ActivityModel, EdgeModel, WorkflowConfigModel, WorkflowModel};
use crate::registry::ActivityRegistry;
use crate::storage::StorageManager;
use crate::types::TypePreview;
use crate::variables::VariableStore;
use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct Workflow {
    activities: AHashMap<ActivityId, ActivityWrapper>,
    edges: Vec<Edge>,
    config: WorkflowConfigModel,
    variables: BTreeMap<String, Value>,
}

impl Workflow {
    pub fn new(config: WorkflowConfigModel, variables: BTreeMap<String, Value>) -> Self {
        Self {
            activities: AHashMap::new(),
            edges: Vec::new(),
            config,
            variables,
        }
    }

    /// Builds a workflow from its model and computes all previews.
    pub fn from_model(
        model: &WorkflowModel,
        registry: &ActivityRegistry,
    ) -> Result<Self, WorkflowError> {
        let mut workflow = Self::new(model.config.clone(), model.variables.clone());
        for activity in &model.activities {
            workflow.insert_activity(ActivityWrapper::from_model(activity, registry)?)?;
        }
        for edge in &model.edges {
            workflow.insert_edge(Edge::from_model(edge))?;
        }
        workflow.update_all_previews();
        Ok(workflow)
    }

    /// Activities are ordered by id for a stable output.
    pub fn to_model(&self, include_state: bool) -> WorkflowModel {
        WorkflowModel {
            activities: self
                .activity_ids()
                .into_iter()
                .filter_map(|id| self.activities.get(&id))
                .map(|a| a.to_model(include_state))
                .collect(),
            edges: self.edges.iter().map(Edge::to_model).collect(),
            config: self.config.clone(),
            variables: self.variables.clone(),
        }
    }

    pub fn config(&self) -> &WorkflowConfigModel {
        &self.config
    }

    pub fn set_config(&mut self, config: WorkflowConfigModel) {
        self.config = config;
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Replaces the workflow variables and recomputes all previews.
    pub fn set_variables(&mut self, variables: BTreeMap<String, Value>) {
        self.variables = variables;
        self.update_all_previews();
    }

    pub fn activity(&self, id: ActivityId) -> Option<&ActivityWrapper> {
        self.activities.get(&id)
    }

    pub fn activity_mut(&mut self, id: ActivityId) -> Option<&mut ActivityWrapper> {
        self.activities.get_mut(&id)
    }

    pub fn get(&self, id: ActivityId) -> Result<&ActivityWrapper, WorkflowError> {
        self.activities
            .get(&id)
            .ok_or(WorkflowError::ActivityNotFound(id))
    }

    pub fn get_mut(&mut self, id: ActivityId) -> Result<&mut ActivityWrapper, WorkflowError> {
        self.activities
            .get_mut(&id)
            .ok_or(WorkflowError::ActivityNotFound(id))
    }

    pub fn activities(&self) -> impl Iterator<Item = &ActivityWrapper> {
        self.activities.values()
    }

    /// Ids of all activities in ascending order.
    pub fn activity_ids(&self) -> Vec<ActivityId> {
        self.activities.keys().copied().sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Creates an activity of `activity_type` with default settings.
    pub fn add_activity(
        &mut self,
        registry: &ActivityRegistry,
        activity_type: &str,
    ) -> Result<ActivityId, WorkflowError> {
        let model = ActivityModel::new(activity_type);
        self.add_activity_model(&model, registry)
    }

    pub fn add_activity_model(
        &mut self,
        model: &ActivityModel,
        registry: &ActivityRegistry,
    ) -> Result<ActivityId, WorkflowError> {
        let wrapper = ActivityWrapper::from_model(model, registry)?;
        let id = wrapper.id();
        self.insert_activity(wrapper)?;
        self.update_preview(id);
        Ok(id)
    }

    fn insert_activity(&mut self, wrapper: ActivityWrapper) -> Result<(), WorkflowError> {
        let id = wrapper.id();
        if self.activities.contains_key(&id) {
            return Err(WorkflowError::DuplicateActivity(id));
        }
        self.activities.insert(id, wrapper);
        Ok(())
    }

    /// Removes an activity with all its edges. Its successors are reset.
    pub fn remove_activity(
        &mut self,
        id: ActivityId,
        storage: &dyn StorageManager,
    ) -> Result<ActivityWrapper, WorkflowError> {
        self.get(id)?;
        self.reset(Some(id), storage)?;
        let successors: Vec<ActivityId> = self.out_edges(id).iter().map(|e| e.to()).collect();
        self.edges.retain(|e| e.from() != id && e.to() != id);
        let removed = self
            .activities
            .remove(&id)
            .ok_or(WorkflowError::ActivityNotFound(id))?;
        for successor in successors {
            self.update_previews_from(successor);
        }
        Ok(removed)
    }

    /// Adds an edge and recomputes the previews downstream of it.
    pub fn add_edge(&mut self, model: &EdgeModel) -> Result<(), WorkflowError> {
        let edge = Edge::from_model(model);
        let target = edge.to();
        self.insert_edge(edge)?;
        self.update_previews_from(target);
        Ok(())
    }

    fn insert_edge(&mut self, edge: Edge) -> Result<(), WorkflowError> {
        let from = self.get(edge.from())?;
        let to = self.get(edge.to())?;
        if edge.from() == edge.to() {
            return Err(WorkflowError::InvalidStructure(format!(
                "edge {} connects an activity to itself",
                edge
            )));
        }
        if let EdgeKind::Data { from_port, to_port } = edge.kind() {
            if from_port >= from.def().out_port_count() || to_port >= to.def().in_port_count() {
                return Err(WorkflowError::InvalidStructure(format!(
                    "edge {} refers to a port that does not exist",
                    edge
                )));
            }
        }
        if self.edges.iter().any(|e| e.is_equivalent(&edge)) {
            return Err(WorkflowError::DuplicateEdge(edge.to_string()));
        }
        if self.reachable(edge.to()).contains(&edge.from()) {
            return Err(WorkflowError::InvalidStructure(format!(
                "edge {} would create a cycle",
                edge
            )));
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn remove_edge(
        &mut self,
        model: &EdgeModel,
        storage: &dyn StorageManager,
    ) -> Result<(), WorkflowError> {
        let edge = Edge::from_model(model);
        let index = self
            .edges
            .iter()
            .position(|e| e.is_equivalent(&edge))
            .ok_or_else(|| WorkflowError::EdgeNotFound(edge.to_string()))?;
        self.reset(Some(edge.to()), storage)?;
        self.edges.remove(index);
        self.update_previews_from(edge.to());
        Ok(())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub(crate) fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    pub(crate) fn edge_mut(&mut self, index: usize) -> Option<&mut Edge> {
        self.edges.get_mut(index)
    }

    pub fn in_edges(&self, id: ActivityId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to() == id).collect()
    }

    pub fn out_edges(&self, id: ActivityId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from() == id).collect()
    }

    pub(crate) fn in_edge_indices(&self, id: ActivityId) -> Vec<usize> {
        (0..self.edges.len())
            .filter(|i| self.edges[*i].to() == id)
            .collect()
    }

    pub(crate) fn out_edge_indices(&self, id: ActivityId) -> Vec<usize> {
        (0..self.edges.len())
            .filter(|i| self.edges[*i].from() == id)
            .collect()
    }

    /// The data edge ending in input `port` of `to`.
    pub fn data_edge(&self, to: ActivityId, port: usize) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.to() == to && e.to_port() == Some(port))
    }

    /// Previews of the inputs of `id`, one per input port. Unconnected ports are `Missing`,
    /// ports behind an inactive edge are `Inactive`.
    pub fn input_types(&self, id: ActivityId) -> Result<Vec<TypePreview>, WorkflowError> {
        let wrapper = self.get(id)?;
        Ok((0..wrapper.def().in_port_count())
            .map(|port| match self.data_edge(id, port) {
                None => TypePreview::Missing,
                Some(edge) if edge.state() == EdgeState::Inactive => TypePreview::Inactive,
                Some(edge) => self
                    .activities
                    .get(&edge.from())
                    .zip(edge.from_port())
                    .and_then(|(from, port)| from.out_type_preview().get(port).cloned())
                    .unwrap_or_else(TypePreview::unknown),
            })
            .collect())
    }

    /// Variables of `id` are stable once every predecessor it depends on has terminated.
    pub fn has_stable_in_variables(&self, id: ActivityId) -> bool {
        self.in_edges(id)
            .iter()
            .filter(|e| !e.is_ignored())
            .all(|e| {
                self.activities
                    .get(&e.from())
                    .is_some_and(|from| from.state().is_terminal())
            })
    }

    /// Rebuilds the variables of `id` from the workflow variables and the dynamic variables
    /// of every predecessor connected by an active edge, data inputs in port order first.
    pub fn recompute_in_variables(&mut self, id: ActivityId) -> Result<(), WorkflowError> {
        let mut store = VariableStore::with_workflow_variables(self.variables.clone());
        let sources = self
            .in_edges(id)
            .into_iter()
            .filter(|e| e.state() == EdgeState::Active)
            .sorted_by_key(|e| (e.is_control(), e.to_port()))
            .map(|e| e.from())
            .collect_vec();
        for source in sources {
            if let Some(upstream) = self.activities.get(&source) {
                store.merge(upstream.variables());
            }
        }
        *self.get_mut(id)?.variables_mut() = store;
        Ok(())
    }

    fn preview(&mut self, id: ActivityId) -> Result<ActivityResult<()>, WorkflowError> {
        let state = self.get(id)?.state();
        if !state.is_executed() {
            self.recompute_in_variables(id)?;
        }
        let in_types = self.input_types(id)?;
        let stable = self.has_stable_in_variables(id);
        Ok(self
            .get_mut(id)?
            .update_out_type_preview(in_types, stable)
            .map(|_| ()))
    }

    /// Recomputes the previews of `id`. Problems are recorded on the activity and logged.
    pub fn update_preview(&mut self, id: ActivityId) {
        match self.preview(id) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(activity = %id, error = %e, "Activity preview is invalid"),
            Err(e) => warn!(activity = %id, error = %e, "Unable to update preview"),
        }
    }

    /// Recomputes the previews of `id` and fails if they are invalid.
    pub fn update_valid_preview(&mut self, id: ActivityId) -> Result<(), WorkflowError> {
        self.preview(id)?.map_err(WorkflowError::from)
    }

    /// Recomputes the previews of `id` and everything reachable from it.
    pub fn update_previews_from(&mut self, id: ActivityId) {
        let reachable = self.reachable(id);
        match self.topological_order(Some(&reachable)) {
            Ok(order) => order.into_iter().for_each(|a| self.update_preview(a)),
            Err(e) => warn!(error = %e, "Unable to update previews"),
        }
    }

    pub fn update_all_previews(&mut self) {
        match self.topological_order(None) {
            Ok(order) => order.into_iter().for_each(|a| self.update_preview(a)),
            Err(e) => warn!(error = %e, "Unable to update previews"),
        }
    }

    /// Activities in an order where every edge points forward, limited to `subset` if given.
    /// Ties are broken by id.
    pub fn topological_order(
        &self,
        subset: Option<&AHashSet<ActivityId>>,
    ) -> Result<Vec<ActivityId>, WorkflowError> {
        let included = |id: &ActivityId| subset.is_none_or(|s| s.contains(id));
        let nodes: Vec<ActivityId> = self
            .activities
            .keys()
            .copied()
            .chain(subset.into_iter().flatten().copied())
            .filter(included)
            .unique()
            .collect();
        let edges: Vec<&Edge> = self
            .edges
            .iter()
            .filter(|e| included(&e.from()) && included(&e.to()))
            .collect();

        let mut in_degree: AHashMap<ActivityId, usize> = nodes.iter().map(|id| (*id, 0)).collect();
        for edge in &edges {
            *in_degree.entry(edge.to()).or_insert(0) += 1;
        }
        let mut ready: BTreeSet<ActivityId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for edge in edges.iter().filter(|e| e.from() == id) {
                if let Some(degree) = in_degree.get_mut(&edge.to()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(edge.to());
                    }
                }
            }
        }
        if order.len() != in_degree.len() {
            return Err(WorkflowError::InvalidStructure(
                "workflow contains a cycle".to_string(),
            ));
        }
        Ok(order)
    }

    /// `root` and every activity reachable from it.
    pub fn reachable(&self, root: ActivityId) -> AHashSet<ActivityId> {
        let mut visited = AHashSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            if visited.insert(id) {
                queue.extend(self.out_edges(id).iter().map(|e| e.to()));
            }
        }
        visited
    }

    /// Resets `root` and everything reachable from it, or the whole workflow, dropping their
    /// checkpoints.
    pub fn reset(
        &mut self,
        root: Option<ActivityId>,
        storage: &dyn StorageManager,
    ) -> Result<(), WorkflowError> {
        let targets: AHashSet<ActivityId> = match root {
            Some(id) => {
                self.get(id)?;
                self.reachable(id)
            }
            None => self.activities.keys().copied().collect(),
        };
        for id in &targets {
            if let Some(wrapper) = self.activities.get_mut(id) {
                wrapper.reset_execution();
            }
            storage.drop_checkpoints(*id);
        }
        for edge in self.edges.iter_mut().filter(|e| targets.contains(&e.to())) {
            edge.reset_execution();
        }
        match root {
            Some(id) => self.update_previews_from(id),
            None => self.update_all_previews(),
        }
        Ok(())
    }

    /// Replaces settings of `id` and resets it together with its successors.
    pub fn update_activity_settings(
        &mut self,
        id: ActivityId,
        settings: &BTreeMap<String, Value>,
        storage: &dyn StorageManager,
    ) -> Result<(), WorkflowError> {
        self.get_mut(id)?.update_settings(settings);
        self.reset(Some(id), storage)
    }

    pub fn update_activity_config(
        &mut self,
        id: ActivityId,
        config: ActivityConfig,
        storage: &dyn StorageManager,
    ) -> Result<(), WorkflowError> {
        self.get_mut(id)?.update_config(config);
        self.reset(Some(id), storage)
    }

    /// Checks that the activities in `subset` form an executable graph.
    pub fn validate_structure(
        &self,
        subset: &AHashSet<ActivityId>,
        storage: &dyn StorageManager,
    ) -> Result<(), WorkflowError> {
        self.topological_order(Some(subset))?;
        for id in subset.iter().sorted() {
            let wrapper = self.get(*id)?;
            let def = wrapper.def();
            let mut occupied = BTreeSet::new();
            for edge in self.in_edges(*id) {
                let from = self.get(edge.from())?;
                let EdgeKind::Data { from_port, to_port } = edge.kind() else {
                    continue;
                };
                if !occupied.insert(to_port) {
                    return Err(WorkflowError::InvalidStructure(format!(
                        "input {} of activity {} has more than one incoming edge",
                        to_port, id
                    )));
                }
                let out_type = from.def().out_ports().get(from_port).map(|p| p.port_type);
                let in_type = def.in_ports().get(to_port).map(|p| p.port_type);
                match (out_type, in_type) {
                    (Some(out_type), Some(in_type)) if out_type.can_connect_to(in_type) => {}
                    _ => {
                        return Err(WorkflowError::InvalidStructure(format!(
                            "edge {} connects incompatible ports",
                            edge
                        )));
                    }
                }
            }
            if let Some(port) = def.required_in_ports().difference(&occupied).next() {
                return Err(WorkflowError::InvalidStructure(format!(
                    "required input {} of activity {} is not connected",
                    port, id
                )));
            }
            let checkpoints = (0..def.out_port_count())
                .filter(|port| storage.has_checkpoint(*id, *port))
                .count();
            match wrapper.state() {
                ActivityState::Saved if checkpoints != def.out_port_count() => {
                    return Err(WorkflowError::InvalidStructure(format!(
                        "saved activity {} is missing checkpoints",
                        id
                    )));
                }
                state if !state.is_executed() && checkpoints > 0 => {
                    return Err(WorkflowError::InvalidStructure(format!(
                        "activity {} has checkpoints but was not executed",
                        id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Gives every context consumer its id and the storage manager, then refreshes previews.
    pub fn attach_storage(&mut self, storage: Arc<dyn StorageManager>) {
        for wrapper in self.activities.values_mut() {
            if wrapper.capabilities().context_consumer {
                wrapper.accept_context(Arc::clone(&storage));
            }
        }
        self.update_all_previews();
    }

    pub(crate) fn take_activity(&mut self, id: ActivityId) -> Option<ActivityWrapper> {
        self.activities.remove(&id)
    }

    pub(crate) fn restore_activity(&mut self, wrapper: ActivityWrapper) {
        self.activities.insert(wrapper.id(), wrapper);
    }

    /// Activities without outgoing edges.
    pub fn sinks(&self) -> Vec<ActivityId> {
        self.activity_ids()
            .into_iter()
            .filter(|id| self.out_edges(*id).is_empty())
            .collect()
    }

    /// Adds a data edge from output `from_port` of `from` to input `to_port` of `to`.
    pub fn connect(
        &mut self,
        from: ActivityId,
        from_port: usize,
        to: ActivityId,
        to_port: usize,
    ) -> Result<(), WorkflowError> {
        self.add_edge(&EdgeModel::data(from, from_port, to, to_port))
    }

    pub fn connect_control(
        &mut self,
        from: ActivityId,
        to: ActivityId,
        on_success: bool,
    ) -> Result<(), WorkflowError> {
        self.add_edge(&EdgeModel::control(from, to, on_success))
    }
}
