// Natural loop analysis
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
// A back edge t->h where h dominates t identifies a natural loop
// Its body is h plus every node that reaches t without
// passing through h, found by a reverse walk from t that stops at h.

use std::collections::HashSet;

use crate::cfg::Cfg;
use crate::dominance::Dominance;

#[derive(Debug)]
pub struct NaturalLoop {
    pub header: usize,
    pub tail: usize,
    pub body: HashSet<usize>,
}

pub fn find_loops(cfg: &Cfg, dom: &Dominance) -> Vec<NaturalLoop> {
    let mut loops = Vec::new();

    for (tail, node) in cfg.nodes.iter().enumerate() {
        for &header in &node.succs {
            if dom.dominates(header, tail) {
                loops.push(NaturalLoop { header, tail, body: natural_loop_body(cfg, header, tail) });
            }
        }
    }

    loops
}

fn natural_loop_body(cfg: &Cfg, header: usize, tail: usize) -> HashSet<usize> {
    let mut body: HashSet<usize> = [header, tail].into_iter().collect();
    let mut worklist = vec![tail];

    while let Some(node) = worklist.pop() {
        for &pred in cfg.predecessors(node) {
            if body.insert(pred) {
                worklist.push(pred);
            }
        }
    }

    body
}

/// True when `inner`'s header is strictly dominated by `outer`'s header,
/// i.e. `outer` nests `inner`.
pub fn nests(outer: &NaturalLoop, inner: &NaturalLoop, dom: &Dominance) -> bool {
    outer.header != inner.header && dom.dominates(outer.header, inner.header)
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

    #[test]
    fn while_loop_is_detected() {
        let mut ids = NodeIdSource::new();
        let cond = Expr::Literal(ids.next(), range(), Literal::Number(1));
        let body_stmt = Stmt::Expr(ids.next(), range(), Expr::Literal(ids.next(), range(), Literal::Number(1)));
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::While(ids.next(), range(), cond, Box::new(body_stmt))],
        );
        let cfg = crate::cfg::build(&body);
        let dom = crate::dominance::compute(&cfg);
        let found = find_loops(&cfg, &dom);
        assert_eq!(found.len(), 1);
        assert!(found[0].body.contains(&found[0].header));
    }

    #[test]
    fn straight_line_code_has_no_loops() {
        let mut ids = NodeIdSource::new();
        let body = Stmt::Block(
            ids.next(),
            range(),
            vec![Stmt::Expr(ids.next(), range(), Expr::Literal(ids.next(), range(), Literal::Number(1)))],
        );
        let cfg = crate::cfg::build(&body);
        let dom = crate::dominance::compute(&cfg);
        assert!(find_loops(&cfg, &dom).is_empty());
    }
}
