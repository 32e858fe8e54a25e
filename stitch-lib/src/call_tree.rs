// BSD 2-Clause License
//
// Copyright (c) 2019, 2020 Alasdair Armstrong
//
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
// notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
// notice, this list of conditions and the following disclaimer in the
// documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The call tree is a trie over the call paths of every finished
//! execution state. Paths which make the same calls share a prefix,
//! and the point where they diverge is dumped as a set of
//! alternative tip calls, so costs computed per path can be
//! recombined over the shared prefixes.

use id_arena::{Arena, Id};
use std::io::Write;

use crate::call::CallRecord;
use crate::call_path::{write_call_sexp, write_call_text};
use crate::exp::{write_exp, Exp};
use crate::log;

/// A call, and the id of the path which first made it at this
/// position in the tree.
#[derive(Clone, Debug)]
pub struct CallPathTip {
    pub call: CallRecord,
    pub path_id: u32,
}

pub struct CallTreeNode {
    tip: Option<CallPathTip>,
    children: Vec<NodeId>,
}

impl CallTreeNode {
    /// `None` only for the root.
    pub fn tip(&self) -> Option<&CallPathTip> {
        self.tip.as_ref()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

pub type NodeId = Id<CallTreeNode>;

/// Something that hands out the numbered files prefixes are dumped
/// into. Returning `None` skips that prefix; the sink is expected to
/// have reported why.
pub trait PrefixSink {
    fn open_next_prefix(&mut self) -> Option<Box<dyn Write>>;
}

pub struct CallTree {
    arena: Arena<CallTreeNode>,
    root: NodeId,
}

impl Default for CallTree {
    fn default() -> Self {
        CallTree::new()
    }
}

impl CallTree {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.alloc(CallTreeNode { tip: None, children: Vec::new() });
        CallTree { arena, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, node: NodeId) -> &CallTreeNode {
        &self.arena[node]
    }

    /// Number of nodes, not counting the root.
    pub fn len(&self) -> usize {
        self.arena.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a path into the tree. Each call descends into the child
    /// holding an equal call, or creates a new child tagged with
    /// `path_id`.
    pub fn add_call_path(&mut self, path: &[CallRecord], path_id: u32) {
        let mut node = self.root;
        for call in path {
            let arena = &self.arena;
            let existing = arena[node]
                .children
                .iter()
                .copied()
                .find(|child| arena[*child].tip.as_ref().map_or(false, |tip| tip.call == *call));
            node = match existing {
                Some(child) => child,
                None => {
                    let child = self.arena.alloc(CallTreeNode {
                        tip: Some(CallPathTip { call: call.clone(), path_id }),
                        children: Vec::new(),
                    });
                    self.arena[node].children.push(child);
                    child
                }
            }
        }
    }

    /// Partition the children of `node` by invocation shape, keeping
    /// the order in which each shape first appears.
    pub fn group_children(&self, node: NodeId) -> Vec<Vec<NodeId>> {
        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        for &child in &self.arena[node].children {
            let call = &self.tip_of(child).call;
            match groups.iter_mut().find(|group| self.tip_of(group[0]).call.same_invocation(call)) {
                Some(group) => group.push(child),
                None => groups.push(vec![child]),
            }
        }
        groups
    }

    fn tip_of(&self, node: NodeId) -> &CallPathTip {
        match &self.arena[node].tip {
            Some(tip) => tip,
            None => panic!("The call tree root has no call"),
        }
    }

    /// Visit every node with a call in depth first order, passing the
    /// calls from the root down to and including that node. The root
    /// is visited first with an empty prefix.
    fn walk<F>(&self, mut visit: F) -> std::io::Result<()>
    where
        F: FnMut(NodeId, &[&CallRecord]) -> std::io::Result<()>,
    {
        let mut prefix: Vec<&CallRecord> = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = vec![(self.root, 0)];
        while let Some((node, depth)) = stack.pop() {
            prefix.truncate(depth.saturating_sub(1));
            if let Some(tip) = &self.arena[node].tip {
                prefix.push(&tip.call)
            }
            visit(node, &prefix)?;
            for &child in self.arena[node].children.iter().rev() {
                stack.push((child, depth + 1))
            }
        }
        Ok(())
    }

    fn dump_prefixes<F>(&self, sink: &mut dyn PrefixSink, mut render: F) -> std::io::Result<bool>
    where
        F: FnMut(&mut Vec<u8>, &[&CallRecord], &[&CallPathTip]) -> std::io::Result<bool>,
    {
        let mut complete = true;
        let mut dumped = 0;
        self.walk(|node, prefix| {
            for group in self.group_children(node) {
                let tips: Vec<&CallPathTip> = group.iter().map(|child| self.tip_of(*child)).collect();
                let mut buf = Vec::new();
                if !render(&mut buf, prefix, &tips)? {
                    complete = false
                }
                if let Some(mut file) = sink.open_next_prefix() {
                    match file.write_all(&buf).and_then(|()| file.flush()) {
                        Ok(()) => dumped += 1,
                        Err(e) => {
                            warn!(format!("Could not write call path prefix: {}", e));
                            complete = false
                        }
                    }
                }
            }
            Ok(())
        })?;
        log!(log::PREFIX, &format!("Dumped {} call path prefixes", dumped));
        Ok(complete)
    }

    /// Dump one S-expression file per shape group of every node:
    ///
    /// ```text
    /// ((history (<call>...))
    /// (tip_calls (
    /// ; id: <path id>(<line>)
    /// <call>...)))
    /// ```
    ///
    /// A call that cannot be rendered ends its list early, so every
    /// file stays well formed. Returns `false` if that happened, or if a
    /// prefix file could not be written.
    pub fn dump_prefixes_sexp(&self, sink: &mut dyn PrefixSink) -> std::io::Result<bool> {
        self.dump_prefixes(sink, |buf, history, tips| {
            let mut complete = true;
            write!(buf, "((history (\n")?;
            for call in history {
                if !write_call_sexp(buf, call)? {
                    complete = false;
                    break;
                }
            }
            write!(buf, "))\n(tip_calls (\n")?;
            if complete {
                for tip in tips {
                    writeln!(buf, "; id: {}({})", tip.path_id, tip.call.line)?;
                    if !write_call_sexp(buf, &tip.call)? {
                        complete = false;
                        break;
                    }
                }
            }
            write!(buf, ")))\n")?;
            Ok(complete)
        })
    }

    /// Dump one human readable file per shape group of every node:
    /// the shared history, the contexts of the history calls, then
    /// the alternatives as a disjunction of calls and their contexts.
    pub fn dump_prefixes_text(&self, sink: &mut dyn PrefixSink) -> std::io::Result<bool> {
        fn write_context(buf: &mut Vec<u8>, context: &[Exp]) -> std::io::Result<()> {
            for exp in context {
                write_exp(buf, exp)?;
                writeln!(buf)?
            }
            Ok(())
        }

        self.dump_prefixes(sink, |buf, history, tips| {
            let mut complete = true;
            for call in history {
                if !write_call_text(buf, call)? {
                    complete = false;
                    break;
                }
            }
            writeln!(buf, "--- Constraints ---")?;
            for call in history {
                write_context(buf, &call.call_context)?;
                writeln!(buf, "---")?;
                write_context(buf, &call.return_context)?;
                writeln!(buf, "---")?
            }
            writeln!(buf, "--- Alternatives ---")?;
            writeln!(buf, "(or ")?;
            for tip in tips {
                let mut alternative = Vec::new();
                writeln!(alternative, "(and ")?;
                if !write_call_text(&mut alternative, &tip.call)? {
                    complete = false;
                    continue;
                }
                write_context(&mut alternative, &tip.call.call_context)?;
                write_context(&mut alternative, &tip.call.return_context)?;
                writeln!(alternative, "true)")?;
                buf.extend_from_slice(&alternative)
            }
            writeln!(buf, "false)")?;
            Ok(complete)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::*;
    use crate::call_path::read_call_sexp;
    use crate::sexp;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        files: Vec<SharedBuf>,
    }

    impl MemorySink {
        fn contents(&self) -> Vec<String> {
            self.files.iter().map(|file| String::from_utf8(file.0.borrow().clone()).unwrap()).collect()
        }
    }

    impl PrefixSink for MemorySink {
        fn open_next_prefix(&mut self) -> Option<Box<dyn Write>> {
            let file = SharedBuf::default();
            self.files.push(file.clone());
            Some(Box::new(file))
        }
    }

    fn call(function: &str, line: u32, ret: u64) -> CallRecord {
        PendingCall::new(function, line)
            .arg(CallArg::new("x", Exp::var("x")))
            .call_context(vec![Exp::Bvult(Box::new(Exp::var("x")), Box::new(Exp::bits(10, 32)))])
            .returning(RetVal::value(Exp::bits(ret, 32)), vec![])
    }

    fn two_args(function: &str, line: u32) -> CallRecord {
        PendingCall::new(function, line)
            .arg(CallArg::new("x", Exp::var("x")))
            .arg(CallArg::new("y", Exp::var("y")))
            .returning(RetVal::void(), vec![])
    }

    #[test]
    fn prefixes_are_shared() {
        let a = call("a", 1, 0);
        let b = call("b", 2, 0);
        let mut tree = CallTree::new();
        tree.add_call_path(&[a.clone(), b.clone(), call("c", 3, 0)], 0);
        tree.add_call_path(&[a.clone(), b.clone(), call("c", 3, 1)], 1);

        let root = tree.node(tree.root());
        assert_eq!(root.children().len(), 1);
        let a_node = tree.node(root.children()[0]);
        assert_eq!(a_node.tip().unwrap().path_id, 0);
        assert_eq!(a_node.children().len(), 1);
        let b_id = a_node.children()[0];
        let b_node = tree.node(b_id);
        assert_eq!(b_node.children().len(), 2);
        assert_eq!(tree.node(b_node.children()[1]).tip().unwrap().path_id, 1);
        assert_eq!(tree.len(), 4);

        assert_eq!(tree.group_children(b_id).len(), 1);
        assert_eq!(tree.group_children(b_id)[0].len(), 2);
    }

    #[test]
    fn shapes_are_grouped_separately() {
        let a = call("a", 1, 0);
        let b = call("b", 2, 0);
        let mut tree = CallTree::new();
        tree.add_call_path(&[a.clone(), b.clone(), call("c", 3, 0)], 0);
        tree.add_call_path(&[a.clone(), b.clone(), two_args("c", 3)], 1);
        tree.add_call_path(&[a.clone(), b.clone(), call("c", 3, 5)], 2);

        let b_id = tree.node(tree.node(tree.root()).children()[0]).children()[0];
        let groups = tree.group_children(b_id);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn repeated_paths_add_nothing() {
        let path = vec![call("a", 1, 0), call("a", 1, 0)];
        let mut tree = CallTree::new();
        tree.add_call_path(&path, 0);
        tree.add_call_path(&path, 1);
        tree.add_call_path(&[], 2);
        assert_eq!(tree.len(), 2);
        let a_node = tree.node(tree.node(tree.root()).children()[0]);
        assert_eq!(a_node.tip().unwrap().path_id, 0);
    }

    #[test]
    fn sexp_prefix_files() {
        let mut tree = CallTree::new();
        tree.add_call_path(&[call("a", 1, 0), call("b", 2, 0)], 0);
        tree.add_call_path(&[call("a", 1, 0), call("b", 2, 1)], 1);
        tree.add_call_path(&[call("a", 1, 0), two_args("c", 7)], 2);

        let mut sink = MemorySink::default();
        assert!(tree.dump_prefixes_sexp(&mut sink).unwrap());
        let files = sink.contents();
        // root, then the two shape groups below a
        assert_eq!(files.len(), 3);

        let first = sexp::parse(&files[0]).unwrap();
        assert_eq!(first.field("history").and_then(sexp::Sexp::as_list).unwrap().len(), 0);
        assert_eq!(first.field("tip_calls").and_then(sexp::Sexp::as_list).unwrap().len(), 1);

        assert!(files[1].contains("; id: 0(2)\n"));
        assert!(files[1].contains("; id: 1(2)\n"));
        let second = sexp::parse(&files[1]).unwrap();
        let history = second.field("history").and_then(sexp::Sexp::as_list).unwrap();
        assert_eq!(read_call_sexp(&history[0]).unwrap().function, "a");
        assert_eq!(second.field("tip_calls").and_then(sexp::Sexp::as_list).unwrap().len(), 2);

        assert!(files[2].contains("; id: 2(7)\n"));
    }

    #[test]
    fn sexp_prefix_truncates_at_pending() {
        let mut pending = call("b", 2, 0);
        pending.args[0].ptr = Ptr::DataPtr(Pointee::new("int").with_out(Traced::Pending));
        let mut tree = CallTree::new();
        tree.add_call_path(&[call("a", 1, 0), pending, call("c", 3, 0)], 0);

        let mut sink = MemorySink::default();
        assert!(!tree.dump_prefixes_sexp(&mut sink).unwrap());
        let files = sink.contents();
        assert_eq!(files.len(), 3);
        for file in &files {
            sexp::parse(file).unwrap();
        }
        let last = sexp::parse(&files[2]).unwrap();
        assert_eq!(last.field("history").and_then(sexp::Sexp::as_list).unwrap().len(), 1);
        assert_eq!(last.field("tip_calls").and_then(sexp::Sexp::as_list).unwrap().len(), 0);
    }

    #[test]
    fn text_prefix_files() {
        let mut tree = CallTree::new();
        tree.add_call_path(&[call("a", 1, 0), call("b", 2, 0)], 0);
        tree.add_call_path(&[call("a", 1, 0), call("b", 2, 1)], 1);

        let mut sink = MemorySink::default();
        assert!(tree.dump_prefixes_text(&mut sink).unwrap());
        let files = sink.contents();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], "--- Constraints ---\n--- Alternatives ---\n(or \n(and \n1:a(x:x) -> #x00000000\n(bvult x #x0000000a)\ntrue)\nfalse)\n");
        assert!(files[1].starts_with("1:a(x:x) -> #x00000000\n--- Constraints ---\n(bvult x #x0000000a)\n---\n---\n--- Alternatives ---\n"));
        assert_eq!(files[1].matches("(and \n").count(), 2);
    }

    #[test]
    fn failed_prefix_writes_are_reported() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        struct FirstFull(MemorySink);
        impl PrefixSink for FirstFull {
            fn open_next_prefix(&mut self) -> Option<Box<dyn Write>> {
                if self.0.files.is_empty() {
                    self.0.files.push(SharedBuf::default());
                    Some(Box::new(std::io::BufWriter::new(Full)))
                } else {
                    self.0.open_next_prefix()
                }
            }
        }

        let mut tree = CallTree::new();
        tree.add_call_path(&[call("a", 1, 0), call("b", 2, 0)], 1);
        tree.add_call_path(&[call("a", 1, 0), call("b", 2, 1)], 2);
        let mut sink = FirstFull(MemorySink::default());
        assert!(!tree.dump_prefixes_sexp(&mut sink).unwrap());
        let files = sink.0.contents();
        assert_eq!(files.len(), 2);
        assert!(files[0].is_empty());
        assert!(files[1].contains("; id: 2(2)"));
    }

    #[test]
    fn unopenable_prefixes_are_skipped() {
        struct Closed;
        impl PrefixSink for Closed {
            fn open_next_prefix(&mut self) -> Option<Box<dyn Write>> {
                None
            }
        }
        let mut tree = CallTree::new();
        tree.add_call_path(&[call("a", 1, 0)], 0);
        assert!(tree.dump_prefixes_sexp(&mut Closed).unwrap());
    }
}
