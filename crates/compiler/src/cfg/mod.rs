//! Control-flow graph
//!
//! Blocks reference predecessors and successors by index, never by
//! pointer; edges live in a flat vector beside the block arena. Every CFG
//! has a dedicated exit block. After construction a DFS from the entry
//! computes reachability and the reverse postorder that the IR emitter
//! uses as its canonical emission order.

mod builder;

pub use builder::{BuildResult, build_cfgs};

use crate::ast::{CaseLabel, ExprId, ParsedType, StmtId};
use crate::diagnostics::{DiagCategory, DiagnosticSink, SourceLoc};

/// Kind tag of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Entry,
    Normal,
    LoopHeader,
    LoopBody,
    LoopIncrement,
    LoopExit,
    CaseTest,
    CaseMatch,
    ExitBlock,
    TryBlock,
    CatchBlock,
    FinallyBlock,
}

/// Kind tag of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Fallthrough,
    Jump,
    BranchTrue,
    BranchFalse,
    BackEdge,
    LoopExit,
    CaseMatch,
    CaseNext,
    Exit,
    GosubCall,
    GosubReturn,
    Exception,
    Finally,
    ComputedBranch,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
}

/// Loop metadata shared between the builder and the emitter. The loop id
/// indexes [`Cfg::loops`] and names the hidden end/step/index slots.
#[derive(Debug, Clone)]
pub enum LoopInfo {
    For {
        var: String,
        start: ExprId,
        end: ExprId,
        step: Option<ExprId>,
    },
    ForEach {
        tag_var: Option<String>,
        var: String,
        list: ExprId,
    },
}

/// Block-attached emission metadata beyond the statement list.
///
/// Control-flow structure lives in the edges; the aux value carries the
/// operands the terminator or block preamble needs (loop slots, case
/// labels, match arms, exception plumbing).
#[derive(Debug, Clone, Default)]
pub enum BlockAux {
    #[default]
    None,
    /// FOR/FOR EACH init, header, or increment role (disambiguated by the
    /// block kind); the payload indexes [`Cfg::loops`].
    Loop(usize),
    /// Pre-test loop condition. `invert` flips the condition (UNTIL).
    LoopCond { invert: bool },
    /// Post-test loop condition; edges are BackEdge (loop again) and
    /// LoopExit. `invert` flips the condition (UNTIL / REPEAT).
    PostCond { invert: bool },
    /// SELECT CASE selector evaluation into the per-select hidden slot.
    SelectInit { select_id: u32, selector: ExprId },
    /// One SELECT CASE test. Edges are CaseMatch / CaseNext.
    CaseTest { select_id: u32, label: CaseLabel },
    /// One MATCH TYPE tag test. Edges are CaseMatch / CaseNext.
    MatchTest { subject: ExprId, arm_ty: ParsedType },
    /// MATCH TYPE arm entry: the fused typed load into the binding.
    MatchBind {
        subject: ExprId,
        arm_ty: ParsedType,
        binding: String,
    },
    /// TRY entry: exception push + direct setjmp + branch.
    TryEntry,
    /// Pops the exception context (normal try completion and catch entry).
    ExceptionPop,
    /// One CATCH code test; None is a catch-all.
    CatchTest { code: Option<ExprId> },
    /// Unmatched exception: rethrow to the outer handler.
    Rethrow,
    /// GOSUB site: pushes its resume index before the call edge.
    GosubSite { site: u32 },
    /// RETURN dispatch in the main program: pops a resume index and
    /// branches over the recorded resume sites.
    GosubReturn,
    /// ON <expr> GOTO/GOSUB computed branch. For GOSUB, `site` is the
    /// shared resume site pushed before dispatch.
    OnBranch {
        selector: ExprId,
        gosub: bool,
        site: Option<u32>,
    },
}

#[derive(Debug)]
pub struct BasicBlock {
    pub index: usize,
    /// Present for label-created blocks
    pub name: Option<String>,
    pub kind: BlockKind,
    pub stmts: Vec<StmtId>,
    pub branch_cond: Option<ExprId>,
    pub aux: BlockAux,
    pub reachable: bool,
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,
}

/// A control-flow graph for the main program or one function body.
#[derive(Debug)]
pub struct Cfg {
    /// Scope key of the function, or "" for the main program
    pub name: String,
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<Edge>,
    pub entry: usize,
    pub exit: usize,
    /// Reverse postorder over reachable blocks
    pub rpo: Vec<usize>,
    pub loops: Vec<LoopInfo>,
    /// Resume block of each GOSUB site, indexed by site id
    pub gosub_resume: Vec<usize>,
    pub select_count: u32,
}

impl Cfg {
    pub fn new(name: impl Into<String>) -> Self {
        let mut cfg = Cfg {
            name: name.into(),
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: 0,
            exit: 0,
            rpo: Vec::new(),
            loops: Vec::new(),
            gosub_resume: Vec::new(),
            select_count: 0,
        };
        cfg.entry = cfg.add_block(BlockKind::Entry);
        cfg.exit = cfg.add_block(BlockKind::ExitBlock);
        cfg
    }

    pub fn add_block(&mut self, kind: BlockKind) -> usize {
        let index = self.blocks.len();
        self.blocks.push(BasicBlock {
            index,
            name: None,
            kind,
            stmts: Vec::new(),
            branch_cond: None,
            aux: BlockAux::None,
            reachable: false,
            preds: Vec::new(),
            succs: Vec::new(),
        });
        index
    }

    pub fn add_edge(&mut self, from: usize, to: usize, kind: EdgeKind) {
        self.edges.push(Edge { from, to, kind });
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    pub fn out_edges(&self, block: usize) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == block)
    }

    /// Target of the single outgoing edge of `kind`, if present.
    pub fn edge_target(&self, block: usize, kind: EdgeKind) -> Option<usize> {
        self.out_edges(block).find(|e| e.kind == kind).map(|e| e.to)
    }

    /// DFS from the entry: marks reachability and computes the reverse
    /// postorder used for emission.
    pub fn compute_rpo(&mut self) {
        for b in &mut self.blocks {
            b.reachable = false;
        }
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry, 0usize)];
        self.blocks[self.entry].reachable = true;
        while let Some((block, child)) = stack.pop() {
            let succs = self.blocks[block].succs.clone();
            if child < succs.len() {
                stack.push((block, child + 1));
                let next = succs[child];
                if !self.blocks[next].reachable {
                    self.blocks[next].reachable = true;
                    stack.push((next, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        postorder.reverse();
        self.rpo = postorder;
    }

    /// Blocks never reached from the entry, in index order.
    pub fn unreachable_blocks(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .filter(|b| !b.reachable)
            .map(|b| b.index)
            .collect()
    }

    /// Structural edge-shape invariants. Violations are compiler bugs and
    /// reported as codegen-category internal errors.
    pub fn check_invariants(&self, sink: &mut DiagnosticSink) {
        for block in &self.blocks {
            let out: Vec<EdgeKind> = self.out_edges(block.index).map(|e| e.kind).collect();
            if block.index == self.exit {
                if !out.is_empty() {
                    self.invariant_error(sink, block.index, "exit block has outgoing edges");
                }
                continue;
            }
            if !self.valid_shape(block, &out) {
                self.invariant_error(
                    sink,
                    block.index,
                    format!("invalid outgoing edge set {:?}", out),
                );
            }
            if block.branch_cond.is_some() && out.len() != 2 {
                self.invariant_error(
                    sink,
                    block.index,
                    "conditional block without a true/false edge pair",
                );
            }
            if block.kind == BlockKind::LoopHeader {
                let back_in = self
                    .edges
                    .iter()
                    .filter(|e| e.to == block.index && e.kind == EdgeKind::BackEdge)
                    .count();
                // Zero back edges happens when the body never falls
                // through (degenerate loop); more than one is a bug.
                if back_in > 1 {
                    self.invariant_error(
                        sink,
                        block.index,
                        format!("loop header has {} back edges", back_in),
                    );
                }
            }
        }
    }

    fn valid_shape(&self, block: &BasicBlock, out: &[EdgeKind]) -> bool {
        use EdgeKind::*;
        // Computed branches and GOSUB-return dispatch are n-ary; check
        // them before the fixed shapes
        match block.aux {
            BlockAux::OnBranch { .. } => {
                return !out.is_empty()
                    && out.iter().filter(|k| **k == ComputedBranch).count() == out.len() - 1
                    && out.iter().filter(|k| **k == Fallthrough).count() == 1;
            }
            BlockAux::GosubReturn => {
                return !out.is_empty()
                    && out.iter().filter(|k| **k == GosubReturn).count() == out.len() - 1
                    && out.iter().filter(|k| **k == Exit).count() == 1;
            }
            _ => {}
        }
        match out {
            [Fallthrough | Jump | BackEdge | LoopExit | Exit | GosubCall | Finally | CaseMatch] => {
                true
            }
            [a, b] => {
                let pair = |x: EdgeKind, y: EdgeKind| {
                    (*a == x && *b == y) || (*a == y && *b == x)
                };
                pair(BranchTrue, BranchFalse)
                    || pair(CaseMatch, CaseNext)
                    || pair(BackEdge, LoopExit)
                    || pair(Fallthrough, Exception)
            }
            _ => false,
        }
    }

    fn invariant_error(&self, sink: &mut DiagnosticSink, block: usize, msg: impl Into<String>) {
        sink.error(
            DiagCategory::Codegen,
            SourceLoc::default(),
            format!(
                "internal: CFG {} block {}: {}",
                if self.name.is_empty() { "<main>" } else { &self.name },
                block,
                msg.into()
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cfg_has_entry_and_exit() {
        let cfg = Cfg::new("");
        assert_eq!(cfg.blocks[cfg.entry].kind, BlockKind::Entry);
        assert_eq!(cfg.blocks[cfg.exit].kind, BlockKind::ExitBlock);
    }

    #[test]
    fn test_edges_update_preds_succs() {
        let mut cfg = Cfg::new("");
        let b = cfg.add_block(BlockKind::Normal);
        cfg.add_edge(cfg.entry, b, EdgeKind::Fallthrough);
        cfg.add_edge(b, cfg.exit, EdgeKind::Exit);
        assert_eq!(cfg.blocks[b].preds, vec![cfg.entry]);
        assert_eq!(cfg.blocks[b].succs, vec![cfg.exit]);
        assert_eq!(cfg.edge_target(b, EdgeKind::Exit), Some(cfg.exit));
    }

    #[test]
    fn test_rpo_visits_reachable_only() {
        let mut cfg = Cfg::new("");
        let a = cfg.add_block(BlockKind::Normal);
        let dead = cfg.add_block(BlockKind::Normal);
        cfg.add_edge(cfg.entry, a, EdgeKind::Fallthrough);
        cfg.add_edge(a, cfg.exit, EdgeKind::Exit);
        cfg.add_edge(dead, cfg.exit, EdgeKind::Exit);
        cfg.compute_rpo();
        assert!(cfg.rpo.contains(&a));
        assert!(!cfg.rpo.contains(&dead));
        assert_eq!(cfg.unreachable_blocks(), vec![dead]);
        // Entry first in RPO
        assert_eq!(cfg.rpo[0], cfg.entry);
    }

    #[test]
    fn test_invariant_detects_dangling_block() {
        let mut cfg = Cfg::new("");
        let a = cfg.add_block(BlockKind::Normal);
        cfg.add_edge(cfg.entry, a, EdgeKind::Fallthrough);
        // `a` has no outgoing edge: invalid shape
        let mut sink = DiagnosticSink::default();
        cfg.check_invariants(&mut sink);
        assert!(sink.has_errors());
    }

    #[test]
    fn test_invariant_accepts_branch_pair() {
        let mut cfg = Cfg::new("");
        let c = cfg.add_block(BlockKind::Normal);
        let t = cfg.add_block(BlockKind::Normal);
        let f = cfg.add_block(BlockKind::Normal);
        cfg.add_edge(cfg.entry, c, EdgeKind::Fallthrough);
        cfg.blocks[c].branch_cond = Some(ExprId(0));
        cfg.add_edge(c, t, EdgeKind::BranchTrue);
        cfg.add_edge(c, f, EdgeKind::BranchFalse);
        cfg.add_edge(t, cfg.exit, EdgeKind::Exit);
        cfg.add_edge(f, cfg.exit, EdgeKind::Exit);
        let mut sink = DiagnosticSink::default();
        cfg.check_invariants(&mut sink);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    }

    #[test]
    fn test_invariant_rejects_mixed_branch_kinds() {
        let mut cfg = Cfg::new("");
        let c = cfg.add_block(BlockKind::Normal);
        cfg.add_edge(cfg.entry, c, EdgeKind::Fallthrough);
        cfg.add_edge(c, cfg.exit, EdgeKind::BranchTrue);
        cfg.add_edge(c, cfg.exit, EdgeKind::Jump);
        let mut sink = DiagnosticSink::default();
        cfg.check_invariants(&mut sink);
        assert!(sink.has_errors());
    }
}
