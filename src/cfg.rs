// Control-flow graph construction
//
// This file is part of blend65c.
// Copyright (C) 2015 Jeffrey Sharp
//
// blend65c is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published
// by the Free Software Foundation, either version 3 of the License,
// or (at your option) any later version.
//
// blend65c is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See
// the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with blend65c.  If not, see <http://www.gnu.org/licenses/>.
//
// One CFG per function body. Nodes are indices into a
// flat `Vec`, not an arena handle, since a CFG never outlives the function
// it describes and nothing else references its nodes by id. `break` and
// `continue` resolve against a stack of (continue-target, break-target)
// pairs pushed by loops and switches, matching "innermost enclosing
// loop/switch" in the construction rule.

use crate::ast::{ForHeader, Stmt, SwitchCase};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CfgNodeKind {
    Entry,
    Exit,
    Block,
    Branch,
    Merge,
}

#[derive(Clone, Debug)]
pub struct CfgNode {
    pub kind: CfgNodeKind,
    pub label: String,
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,
}

pub struct Cfg {
    pub nodes: Vec<CfgNode>,
    pub entry: usize,
    pub exit: usize,
}

impl Cfg {
    fn new() -> Self {
        let mut nodes = Vec::new();
        nodes.push(CfgNode { kind: CfgNodeKind::Entry, label: "entry".into(), preds: vec![], succs: vec![] });
        nodes.push(CfgNode { kind: CfgNodeKind::Exit, label: "exit".into(), preds: vec![], succs: vec![] });
        Cfg { nodes, entry: 0, exit: 1 }
    }

    fn add(&mut self, kind: CfgNodeKind, label: impl Into<String>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(CfgNode { kind, label: label.into(), preds: vec![], succs: vec![] });
        id
    }

    fn link(&mut self, from: usize, to: usize) {
        if !self.nodes[from].succs.contains(&to) {
            self.nodes[from].succs.push(to);
        }
        if !self.nodes[to].preds.contains(&from) {
            self.nodes[to].preds.push(from);
        }
    }

    pub fn predecessors(&self, node: usize) -> &[usize] {
        &self.nodes[node].preds
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        &self.nodes[node].succs
    }

    /// Every non-exit node can reach `exit`.
    pub fn all_reach_exit(&self) -> bool {
        let mut reaches = vec![false; self.nodes.len()];
        reaches[self.exit] = true;
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..self.nodes.len() {
                if reaches[i] {
                    continue;
                }
                if self.nodes[i].succs.iter().any(|&s| reaches[s]) {
                    reaches[i] = true;
                    changed = true;
                }
            }
        }
        (0..self.nodes.len()).filter(|&n| n != self.exit).all(|n| reaches[n])
    }
}

struct LoopLabels {
    continue_target: usize,
    break_target: usize,
    suffix: u32,
}

struct Builder {
    cfg: Cfg,
    label_counter: u32,
    loop_stack: Vec<LoopLabels>,
}

/// Builds the CFG for one function body. `body` is expected to be a
/// `Stmt::Block`.
pub fn build(body: &Stmt) -> Cfg {
    let mut builder = Builder { cfg: Cfg::new(), label_counter: 0, loop_stack: Vec::new() };
    let entry = builder.cfg.entry;
    let tail = builder.stmt(body, entry);
    if tail != builder.cfg.exit {
        builder.cfg.link(tail, builder.cfg.exit);
    }
    builder.cfg
}

impl Builder {
    fn next_suffix(&mut self) -> u32 {
        self.label_counter += 1;
        self.label_counter
    }

    /// Lowers `stmt` starting at `current`; returns the node execution
    /// continues from after the statement (or `exit` if control does not
    /// fall through, e.g. after `return`/`break`/`continue`).
    fn stmt(&mut self, stmt: &Stmt, current: usize) -> usize {
        match stmt {
            Stmt::Block(_, _, stmts) => {
                let mut cursor = current;
                for s in stmts {
                    cursor = self.stmt(s, cursor);
                }
                cursor
            }
            Stmt::Expr(..) => {
                let block = self.cfg.add(CfgNodeKind::Block, "block");
                self.cfg.link(current, block);
                block
            }
            Stmt::If(_, _, _, then, els) => {
                let suffix = self.next_suffix();
                let branch = self.cfg.add(CfgNodeKind::Branch, format!("if_{}", suffix));
                self.cfg.link(current, branch);
                let then_entry = self.cfg.add(CfgNodeKind::Block, format!("if_then_{}", suffix));
                self.cfg.link(branch, then_entry);
                let then_exit = self.stmt(then, then_entry);

                let else_exit = if let Some(els) = els {
                    let else_entry = self.cfg.add(CfgNodeKind::Block, format!("if_else_{}", suffix));
                    self.cfg.link(branch, else_entry);
                    self.stmt(els, else_entry)
                } else {
                    branch
                };

                let merge = self.cfg.add(CfgNodeKind::Merge, format!("if_merge_{}", suffix));
                if then_exit != self.cfg.exit {
                    self.cfg.link(then_exit, merge);
                }
                if else_exit != self.cfg.exit {
                    self.cfg.link(else_exit, merge);
                }
                merge
            }
            Stmt::While(_, _, _, body) => {
                let suffix = self.next_suffix();
                let header = self.cfg.add(CfgNodeKind::Branch, format!("while_header_{}", suffix));
                self.cfg.link(current, header);
                let exit_node = self.cfg.add(CfgNodeKind::Merge, format!("while_exit_{}", suffix));
                self.loop_stack.push(LoopLabels { continue_target: header, break_target: exit_node, suffix });
                let body_entry = self.cfg.add(CfgNodeKind::Block, format!("while_body_{}", suffix));
                self.cfg.link(header, body_entry);
                let body_exit = self.stmt(body, body_entry);
                if body_exit != self.cfg.exit {
                    self.cfg.link(body_exit, header);
                }
                self.cfg.link(header, exit_node);
                self.loop_stack.pop();
                exit_node
            }
            Stmt::DoWhile(_, _, body, _) => {
                let suffix = self.next_suffix();
                let exit_node = self.cfg.add(CfgNodeKind::Merge, format!("do_exit_{}", suffix));
                let header = self.cfg.add(CfgNodeKind::Branch, format!("do_header_{}", suffix));
                self.loop_stack.push(LoopLabels { continue_target: header, break_target: exit_node, suffix });
                let body_entry = self.cfg.add(CfgNodeKind::Block, format!("do_body_{}", suffix));
                self.cfg.link(current, body_entry);
                let body_exit = self.stmt(body, body_entry);
                if body_exit != self.cfg.exit {
                    self.cfg.link(body_exit, header);
                }
                self.cfg.link(header, body_entry);
                self.cfg.link(header, exit_node);
                self.loop_stack.pop();
                exit_node
            }
            Stmt::For(_, _, header, body) => self.lower_for(header, body, current),
            Stmt::Switch(_, _, _, cases, default) => self.lower_switch(cases, default.as_deref(), current),
            Stmt::Match(..) => current,
            Stmt::Break(..) => {
                if let Some(target) = self.loop_stack.last().map(|l| l.break_target) {
                    self.cfg.link(current, target);
                }
                self.cfg.exit
            }
            Stmt::Continue(..) => {
                if let Some(target) = self.loop_stack.last().map(|l| l.continue_target) {
                    self.cfg.link(current, target);
                }
                self.cfg.exit
            }
            Stmt::Return(..) => {
                self.cfg.link(current, self.cfg.exit);
                self.cfg.exit
            }
        }
    }

    fn lower_for(&mut self, header: &ForHeader, body: &Stmt, current: usize) -> usize {
        let suffix = self.next_suffix();
        let init = self.cfg.add(CfgNodeKind::Block, format!("for_init_{}", suffix));
        self.cfg.link(current, init);
        let head = self.cfg.add(CfgNodeKind::Branch, format!("for_header_{}", suffix));
        self.cfg.link(init, head);
        let exit_node = self.cfg.add(CfgNodeKind::Merge, format!("for_exit_{}", suffix));
        let incr = self.cfg.add(CfgNodeKind::Block, format!("for_incr_{}", suffix));
        self.loop_stack.push(LoopLabels { continue_target: incr, break_target: exit_node, suffix });
        let body_entry = self.cfg.add(CfgNodeKind::Block, format!("for_body_{}", suffix));
        self.cfg.link(head, body_entry);
        let body_exit = self.stmt(body, body_entry);
        if body_exit != self.cfg.exit {
            self.cfg.link(body_exit, incr);
        }
        self.cfg.link(incr, head);
        self.cfg.link(head, exit_node);
        self.loop_stack.pop();
        let _ = header;
        exit_node
    }

    fn lower_switch(&mut self, cases: &[SwitchCase], default: Option<&Stmt>, current: usize) -> usize {
        let suffix = self.next_suffix();
        let exit_node = self.cfg.add(CfgNodeKind::Merge, format!("switch_exit_{}", suffix));
        self.loop_stack.push(LoopLabels { continue_target: exit_node, break_target: exit_node, suffix });

        let mut dispatch = current;
        for case in cases {
            let test = self.cfg.add(CfgNodeKind::Branch, format!("switch_case_{}", suffix));
            self.cfg.link(dispatch, test);
            let body_entry = self.cfg.add(CfgNodeKind::Block, format!("switch_body_{}", suffix));
            self.cfg.link(test, body_entry);
            let body_exit = self.stmt(&case.body, body_entry);
            if body_exit != self.cfg.exit {
                self.cfg.link(body_exit, exit_node);
            }
            dispatch = test;
        }
        match default {
            Some(default) => {
                let default_exit = self.stmt(default, dispatch);
                if default_exit != self.cfg.exit {
                    self.cfg.link(default_exit, exit_node);
                }
            }
            None => self.cfg.link(dispatch, exit_node),
        }

        self.loop_stack.pop();
        exit_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Literal, NodeIdSource};
    use crate::source::Range;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("t.b65"))
    }

    fn lit(ids: &mut NodeIdSource, n: u64) -> Expr {
        Expr::Literal(ids.next(), range(), Literal::Number(n))
    }

    #[test]
    fn entry_has_no_predecessors_and_exit_no_successors() {
        let mut ids = NodeIdSource::new();
        let body = Stmt::Block(ids.next(), range(), vec![Stmt::Return(ids.next(), range(), None)]);
        let cfg = build(&body);
        assert!(cfg.predecessors(cfg.entry).is_empty());
        assert!(cfg.successors(cfg.exit).is_empty());
    }

    #[test]
    fn edges_are_symmetric() {
        let mut ids = NodeIdSource::new();
        let cond = lit(&mut ids, 1);
        let then = Stmt::Expr(ids.next(), range(), lit(&mut ids, 1));
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::If(ids.next(), range(), cond, Box::new(then), None)],
        );
        let cfg = build(&body);
        for (u, node) in cfg.nodes.iter().enumerate() {
            for &v in &node.succs {
                assert!(cfg.nodes[v].preds.contains(&u));
            }
            for &p in &node.preds {
                assert!(cfg.nodes[p].succs.contains(&u));
            }
        }
    }

    #[test]
    fn every_node_reaches_exit() {
        let mut ids = NodeIdSource::new();
        let cond = lit(&mut ids, 1);
        let body_stmt = Stmt::Expr(ids.next(), range(), lit(&mut ids, 1));
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::While(ids.next(), range(), cond, Box::new(body_stmt))],
        );
        let cfg = build(&body);
        assert!(cfg.all_reach_exit());
    }

    #[test]
    fn break_targets_loop_exit() {
        let mut ids = NodeIdSource::new();
        let cond = lit(&mut ids, 1);
        let body_stmt = Stmt::Block(ids.next(), range(), vec![Stmt::Break(ids.next(), range())]);
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::While(ids.next(), range(), cond, Box::new(body_stmt))],
        );
        let cfg = build(&body);
        assert!(cfg.all_reach_exit());
    }
}
