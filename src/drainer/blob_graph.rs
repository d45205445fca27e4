//! Blob-level dependency graph built from a worker partitioning.
//!
//! Blob A precedes blob B when one of A's output tokens is one of B's input
//! tokens. Construction validates the partitioning, rejects cycles with a
//! three-color DFS and requires exactly one source blob, the blob that owns
//! the overall input of the stream.

use crate::blob::{blob_id, Blob, Token, WorkerId};
use crate::drainer::blob_node::{BlobNode, NodeIndex};
use crate::error::{DrainError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Workers and the directed edges between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTopology {
    successors: BTreeMap<WorkerId, BTreeSet<WorkerId>>,
    predecessors: BTreeMap<WorkerId, BTreeSet<WorkerId>>,
}

impl StreamTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// A straight pipeline `ids[0] -> ids[1] -> ...`.
    pub fn pipeline(ids: impl IntoIterator<Item = i32>) -> Self {
        let mut topology = Self::new();
        let mut previous: Option<WorkerId> = None;
        for id in ids {
            let worker = WorkerId(id);
            topology.add_worker(worker);
            if let Some(prev) = previous {
                topology.connect(prev, worker);
            }
            previous = Some(worker);
        }
        topology
    }

    pub fn add_worker(&mut self, worker: WorkerId) -> &mut Self {
        self.successors.entry(worker).or_default();
        self.predecessors.entry(worker).or_default();
        self
    }

    /// Add the edge `upstream -> downstream`, registering both workers.
    pub fn connect(&mut self, upstream: WorkerId, downstream: WorkerId) -> &mut Self {
        self.add_worker(upstream).add_worker(downstream);
        self.successors
            .entry(upstream)
            .or_default()
            .insert(downstream);
        self.predecessors
            .entry(downstream)
            .or_default()
            .insert(upstream);
        self
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.successors.contains_key(&worker)
    }

    pub fn workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.successors.keys().copied()
    }

    /// Every worker edge as a token.
    pub fn edges(&self) -> impl Iterator<Item = Token> + '_ {
        self.successors
            .iter()
            .flat_map(|(up, downs)| downs.iter().map(move |down| Token::between(*up, *down)))
    }

    pub fn successors(&self, worker: WorkerId) -> impl Iterator<Item = WorkerId> + '_ {
        self.successors.get(&worker).into_iter().flatten().copied()
    }

    pub fn predecessors(&self, worker: WorkerId) -> impl Iterator<Item = WorkerId> + '_ {
        self.predecessors.get(&worker).into_iter().flatten().copied()
    }

    /// Boundary `(inputs, outputs)` of a group of workers.
    ///
    /// Edges crossing the group boundary become tokens; a worker without
    /// predecessors contributes the overall input `Token(-1, w)` and one
    /// without successors the overall output `Token(w, -1)`.
    pub fn external_edges(&self, group: &BTreeSet<WorkerId>) -> (BTreeSet<Token>, BTreeSet<Token>) {
        let mut inputs = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        for &worker in group {
            let mut has_pred = false;
            for pred in self.predecessors(worker) {
                has_pred = true;
                if !group.contains(&pred) {
                    inputs.insert(Token::between(pred, worker));
                }
            }
            if !has_pred {
                inputs.insert(Token::overall_input(worker));
            }

            let mut has_succ = false;
            for succ in self.successors(worker) {
                has_succ = true;
                if !group.contains(&succ) {
                    outputs.insert(Token::between(worker, succ));
                }
            }
            if !has_succ {
                outputs.insert(Token::overall_output(worker));
            }
        }
        (inputs, outputs)
    }
}

/// Workers and boundary tokens of one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobBoundary {
    pub workers: BTreeSet<WorkerId>,
    pub inputs: BTreeSet<Token>,
    pub outputs: BTreeSet<Token>,
}

impl BlobBoundary {
    /// The blob's identifier: its smallest input token.
    pub fn id(&self) -> Option<Token> {
        self.inputs.iter().next().copied()
    }
}

/// Validated, acyclic blob graph with a unique source.
#[derive(Debug)]
pub struct BlobGraph {
    /// Sorted by blob id; `nodes[i].index() == NodeIndex(i)`.
    nodes: Vec<BlobNode>,
    by_id: BTreeMap<Token, NodeIndex>,
    source: NodeIndex,
}

impl BlobGraph {
    /// Build the graph for `partitions` of `topology`.
    pub fn new(topology: &StreamTopology, partitions: &[BTreeSet<WorkerId>]) -> Result<Self> {
        let mut owner: BTreeMap<WorkerId, usize> = BTreeMap::new();
        for (group_idx, group) in partitions.iter().enumerate() {
            if group.is_empty() {
                return Err(DrainError::EmptyPartition(group_idx));
            }
            for &worker in group {
                if !topology.contains(worker) {
                    return Err(DrainError::UnknownWorker(worker));
                }
                if owner.insert(worker, group_idx).is_some() {
                    return Err(DrainError::OverlappingPartitions(worker));
                }
            }
        }

        for token in topology.edges() {
            if !owner.contains_key(&token.upstream()) || !owner.contains_key(&token.downstream()) {
                return Err(DrainError::DanglingToken(token));
            }
        }
        if let Some(worker) = topology.workers().find(|w| !owner.contains_key(w)) {
            // Isolated worker outside every group.
            return Err(DrainError::DanglingToken(Token::overall_input(worker)));
        }

        let mut boundaries = Vec::with_capacity(partitions.len());
        for group in partitions {
            let (inputs, outputs) = topology.external_edges(group);
            if inputs.is_empty() {
                // Every worker of the group is fed from inside the group.
                return Err(DrainError::CycleDetected);
            }
            boundaries.push(BlobBoundary {
                workers: group.clone(),
                inputs,
                outputs,
            });
        }

        Self::from_boundaries(boundaries)
    }

    /// Build the graph from the boundary channels of already-built blobs.
    pub fn from_blobs(blobs: &[Arc<dyn Blob>]) -> Result<Self> {
        let boundaries = blobs
            .iter()
            .map(|blob| BlobBoundary {
                workers: blob.workers().clone(),
                inputs: blob.inputs(),
                outputs: blob.outputs(),
            })
            .collect();
        let graph = Self::from_boundaries(boundaries)?;
        debug_assert!(blobs
            .iter()
            .all(|blob| blob_id(blob.as_ref()).is_some_and(|id| graph.index_of(id).is_some())));
        Ok(graph)
    }

    /// Build the graph from explicit blob boundaries.
    pub fn from_boundaries(mut boundaries: Vec<BlobBoundary>) -> Result<Self> {
        if let Some(boundary) = boundaries.iter().find(|b| b.inputs.is_empty()) {
            return Err(DrainError::Config(format!(
                "blob with workers {:?} has no input channels",
                boundary.workers
            )));
        }
        boundaries.sort_by_key(BlobBoundary::id);

        let (input_owner, output_owner) = Self::token_owners(&boundaries)?;
        Self::check_token_consistency(&input_owner, &output_owner)?;

        let n = boundaries.len();
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (&token, &from) in &output_owner {
            if let Some(&to) = input_owner.get(&token) {
                successors[from].insert(to);
            }
        }
        let successors: Vec<Vec<usize>> = successors
            .into_iter()
            .map(|set| set.into_iter().collect())
            .collect();

        if has_cycle(&successors) {
            return Err(DrainError::CycleDetected);
        }

        let mut nodes: Vec<BlobNode> = boundaries
            .into_iter()
            .enumerate()
            .filter_map(|(i, b)| {
                let id = b.id()?;
                Some(BlobNode::new(id, NodeIndex(i as u32), b.workers, b.inputs, b.outputs))
            })
            .collect();
        for (from, succs) in successors.iter().enumerate() {
            for &to in succs {
                nodes[from].add_successor(NodeIndex(to as u32));
                nodes[to].add_predecessor(NodeIndex(from as u32));
            }
        }

        let sources: Vec<&BlobNode> = nodes
            .iter()
            .filter(|node| node.predecessors().is_empty())
            .collect();
        let source = match sources.as_slice() {
            [] => return Err(DrainError::NoSourceBlob),
            [only] => only.index(),
            many => {
                return Err(DrainError::MultipleSourceBlobs(
                    many.iter().map(|node| node.id()).collect(),
                ))
            }
        };

        let by_id = nodes.iter().map(|node| (node.id(), node.index())).collect();
        let graph = Self {
            nodes,
            by_id,
            source,
        };
        tracing::debug!(
            "Blob graph built: {} blobs, source {}",
            graph.len(),
            graph.source().id()
        );
        Ok(graph)
    }

    /// Map each boundary token to the single blob reading it and the single
    /// blob writing it.
    fn token_owners(
        boundaries: &[BlobBoundary],
    ) -> Result<(BTreeMap<Token, usize>, BTreeMap<Token, usize>)> {
        let mut input_owner = BTreeMap::new();
        let mut output_owner = BTreeMap::new();
        for (i, boundary) in boundaries.iter().enumerate() {
            for &token in &boundary.inputs {
                if input_owner.insert(token, i).is_some() {
                    return Err(DrainError::DanglingToken(token));
                }
            }
            for &token in &boundary.outputs {
                if output_owner.insert(token, i).is_some() {
                    return Err(DrainError::DanglingToken(token));
                }
            }
        }
        Ok((input_owner, output_owner))
    }

    /// Every inter-blob token must be one blob's output and another blob's input.
    fn check_token_consistency(
        input_owner: &BTreeMap<Token, usize>,
        output_owner: &BTreeMap<Token, usize>,
    ) -> Result<()> {
        for (&token, &writer) in output_owner {
            if token.is_overall_output() {
                continue;
            }
            match input_owner.get(&token) {
                Some(&reader) if reader != writer => {}
                _ => return Err(DrainError::DanglingToken(token)),
            }
        }
        for (&token, &reader) in input_owner {
            if token.is_overall_input() {
                continue;
            }
            match output_owner.get(&token) {
                Some(&writer) if writer != reader => {}
                _ => return Err(DrainError::DanglingToken(token)),
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Blob ids in ascending order.
    pub fn blob_ids(&self) -> Vec<Token> {
        self.by_id.keys().copied().collect()
    }

    pub fn nodes(&self) -> &[BlobNode] {
        &self.nodes
    }

    pub fn node(&self, blob: Token) -> Option<&BlobNode> {
        self.index_of(blob).map(|idx| &self.nodes[idx.index()])
    }

    /// Node at `idx`; indices come from this graph.
    pub fn node_at(&self, idx: NodeIndex) -> &BlobNode {
        &self.nodes[idx.index()]
    }

    pub fn index_of(&self, blob: Token) -> Option<NodeIndex> {
        self.by_id.get(&blob).copied()
    }

    pub fn inputs(&self, blob: Token) -> Option<&BTreeSet<Token>> {
        self.node(blob).map(BlobNode::inputs)
    }

    pub fn outputs(&self, blob: Token) -> Option<&BTreeSet<Token>> {
        self.node(blob).map(BlobNode::outputs)
    }

    /// The unique blob without predecessors.
    pub fn source(&self) -> &BlobNode {
        self.node_at(self.source)
    }

    /// Blob ids ordered so every blob follows all of its predecessors.
    pub fn topological_order(&self) -> Vec<Token> {
        let mut in_degree: Vec<usize> = self
            .nodes
            .iter()
            .map(|node| node.predecessors().len())
            .collect();
        let mut queue: VecDeque<NodeIndex> = self
            .nodes
            .iter()
            .filter(|node| node.predecessors().is_empty())
            .map(BlobNode::index)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = queue.pop_front() {
            let node = self.node_at(idx);
            order.push(node.id());
            for &succ in node.successors() {
                in_degree[succ.index()] -= 1;
                if in_degree[succ.index()] == 0 {
                    queue.push_back(succ);
                }
            }
        }
        order
    }

    /// Restore every node to its start-of-pass state.
    pub(crate) fn reset(&self) {
        for node in &self.nodes {
            node.reset();
        }
    }
}

/// Three-color DFS over `successors`; returns whether a back edge exists.
fn has_cycle(successors: &[Vec<usize>]) -> bool {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color = vec![Color::White; successors.len()];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..successors.len() {
        if color[start] != Color::White {
            continue;
        }
        color[start] = Color::Gray;
        stack.push((start, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            match successors[node].get(next) {
                Some(&succ) => {
                    frame.1 += 1;
                    match color[succ] {
                        Color::Gray => return true,
                        Color::White => {
                            color[succ] = Color::Gray;
                            stack.push((succ, 0));
                        }
                        Color::Black => {}
                    }
                }
                None => {
                    color[node] = Color::Black;
                    stack.pop();
                }
            }
        }
    }
    false
}
