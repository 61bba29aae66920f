// Dominator tree and dominance frontiers
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
// Straightforward iterative data-flow rather than the
// Lengauer-Tarjan algorithm: function CFGs in this language are small, and
// simplicity here makes the fixpoint easy to verify by inspection.

use std::collections::HashSet;

use crate::cfg::Cfg;

pub struct Dominance {
    /// `dom[n]` is the set of nodes that dominate `n`, including `n` itself.
    pub dom: Vec<HashSet<usize>>,
    /// Immediate dominator of each node; `None` only for the entry node.
    pub idom: Vec<Option<usize>>,
    /// Dominance frontier of each node.
    pub frontier: Vec<Vec<usize>>,
}

pub fn compute(cfg: &Cfg) -> Dominance {
    let n = cfg.nodes.len();
    let all: HashSet<usize> = (0..n).collect();

    let mut dom = vec![all.clone(); n];
    dom[cfg.entry] = [cfg.entry].into_iter().collect();

    let mut changed = true;
    while changed {
        changed = false;
        for node in 0..n {
            if node == cfg.entry {
                continue;
            }
            let preds = cfg.predecessors(node);
            if preds.is_empty() {
                continue;
            }
            let mut new_dom: HashSet<usize> = dom[preds[0]].clone();
            for &p in &preds[1..] {
                new_dom = new_dom.intersection(&dom[p]).copied().collect();
            }
            new_dom.insert(node);
            if new_dom != dom[node] {
                dom[node] = new_dom;
                changed = true;
            }
        }
    }

    let idom = (0..n)
        .map(|node| {
            if node == cfg.entry {
                return None;
            }
            // The immediate dominator is the strict dominator closest to
            // `node`: the one that is dominated by every other strict
            // dominator of `node`.
            let strict: Vec<usize> = dom[node].iter().copied().filter(|&d| d != node).collect();
            strict.iter().copied().find(|&cand| strict.iter().all(|&other| other == cand || dom[other].contains(&cand)))
        })
        .collect();

    let frontier = compute_frontier(cfg, &idom);

    Dominance { dom, idom, frontier }
}

fn compute_frontier(cfg: &Cfg, idom: &[Option<usize>]) -> Vec<Vec<usize>> {
    let n = cfg.nodes.len();
    let mut frontier: Vec<Vec<usize>> = vec![Vec::new(); n];

    for b in 0..n {
        let preds = cfg.predecessors(b);
        if preds.len() < 2 {
            continue;
        }
        for &p in preds {
            let mut runner = p;
            while Some(runner) != idom[b] {
                if !frontier[runner].contains(&b) {
                    frontier[runner].push(b);
                }
                match idom[runner] {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }

    frontier
}

impl Dominance {
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        self.dom[b].contains(&a)
    }

    pub fn strictly_dominates(&self, a: usize, b: usize) -> bool {
        a != b && self.dominates(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Literal, NodeIdSource, Stmt};
    use crate::source::Range;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("t.b65"))
    }

    fn diamond_cfg() -> Cfg {
        let mut ids = NodeIdSource::new();
        let cond = Expr::Literal(ids.next(), range(), Literal::Number(1));
        let then = Stmt::Expr(ids.next(), range(), Expr::Literal(ids.next(), range(), Literal::Number(1)));
        let els = Stmt::Expr(ids.next(), range(), Expr::Literal(ids.next(), range(), Literal::Number(2)));
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::If(ids.next(), range(), cond, Box::new(then), Some(Box::new(els)))],
        );
        crate::cfg::build(&body)
    }

    #[test]
    fn entry_has_no_idom() {
        let cfg = diamond_cfg();
        let dom = compute(&cfg);
        assert_eq!(dom.idom[cfg.entry], None);
    }

    #[test]
    fn idom_strictly_dominates() {
        let cfg = diamond_cfg();
        let dom = compute(&cfg);
        for node in 0..cfg.nodes.len() {
            if let Some(idom) = dom.idom[node] {
                assert!(dom.strictly_dominates(idom, node));
            }
        }
    }

    #[test]
    fn merge_block_appears_in_some_frontier() {
        let cfg = diamond_cfg();
        let dom = compute(&cfg);
        let merge = (0..cfg.nodes.len())
            .find(|&n| cfg.predecessors(n).len() >= 2)
            .expect("diamond CFG has a merge node");
        assert!(dom.frontier.iter().any(|f| f.contains(&merge)));
    }
}
