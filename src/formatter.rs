//! The tree-rewriting formatting engine.
//!
//! Formatting is a fixed-point traversal over the lossless tree while the
//! output buffer is kept byte-aligned with it. The buffer starts as a
//! verbatim copy of the source; the engine then walks the tree in pre-order.
//! Every node is either *accepted* — the cursor advances over its bytes,
//! which are thereby final — or *replaced*: a rewrite rule has spliced new
//! bytes into the buffer and handed back a new subtree, and the driver
//! retries at the same position until the rules have nothing left to say.
//!
//! Convergence rests on the rule contract: a rule applied to its own output
//! must accept. The iteration bounds here are not part of normal operation,
//! they catch rules that break that contract.

use std::io::Write;

use tracing::{debug, trace};

use crate::buffer::FmtBuffer;
use crate::cst::{validate_spans, Kind, Node, NodeFlags};
use crate::error::{EngineError, Error};
use crate::parser;
use crate::rules;

/// Upper bound on rewrites of a single child position.
pub const CHILD_ITERATION_LIMIT: usize = 1000;

/// User-facing switches. The engine itself reads `assert` (extra invariant
/// checking) and `debug`; the rest are visible to rules and the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub quiet: bool,
    pub verbose: bool,
    pub assert: bool,
    pub debug: bool,
    pub check: bool,
    pub diff: bool,
}

/// What happened to a node under the rule pipeline.
#[derive(Debug)]
pub enum Outcome {
    /// The node's bytes are final; the cursor has moved past them.
    Accepted,
    /// The node was rewritten. The new bytes are already spliced in and the
    /// cursor is back at the node's first byte; the caller retries.
    Replaced(Node),
    /// Reserved. No shipped rule produces this; the drivers treat it as a
    /// contract violation wherever it shows up.
    Deleted,
}

/// Single-use formatting state: the source, its tree, and the output buffer
/// whose cursor mirrors the traversal.
pub struct Context {
    pub(crate) src_str: String,
    pub(crate) src_tree: Node,
    pub(crate) fmt_io: FmtBuffer,
    pub(crate) fmt_tree: Option<Node>,
    pub(crate) prev_sibling: Option<Node>,
    pub(crate) next_sibling: Option<Node>,
    pub(crate) flags: Flags,
}

impl Context {
    /// Parse `src` and set up a context with default flags.
    pub fn new(src: &str) -> Result<Context, Error> {
        Context::with_flags(src, Flags::default())
    }

    pub fn with_flags(src: &str, mut flags: Flags) -> Result<Context, Error> {
        // One-way widening: debug implies the checked, chatty configuration.
        if flags.debug {
            flags.verbose = true;
            flags.assert = true;
        }
        let src_tree = parser::parse(src)?;
        Ok(Context {
            src_str: src.to_owned(),
            src_tree,
            fmt_io: FmtBuffer::new(),
            fmt_tree: None,
            prev_sibling: None,
            next_sibling: None,
            flags,
        })
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn src(&self) -> &str {
        &self.src_str
    }

    pub fn src_tree(&self) -> &Node {
        &self.src_tree
    }

    /// The rewritten tree; present once [`Context::format`] has finished.
    pub fn fmt_tree(&self) -> Option<&Node> {
        self.fmt_tree.as_ref()
    }

    /// Most recent sibling from the *rewritten* prefix of the child list
    /// currently being formatted.
    pub fn prev_sibling(&self) -> Option<&Node> {
        self.prev_sibling.as_ref()
    }

    /// Next sibling from the *original* child list; its formatting has not
    /// happened yet.
    pub fn next_sibling(&self) -> Option<&Node> {
        self.next_sibling.as_ref()
    }

    pub fn output_bytes(&self) -> &[u8] {
        self.fmt_io.as_slice()
    }

    /// Run the engine over the whole tree.
    pub fn format(&mut self) -> Result<(), Error> {
        format_tree(self).map_err(Error::from)
    }

    /// The formatted text. Only meaningful after [`Context::format`].
    pub fn into_output(self) -> Result<String, Error> {
        String::from_utf8(self.fmt_io.into_bytes()).map_err(|_| {
            Error::from(EngineError::Assertion(
                "formatted output is not valid UTF-8".into(),
            ))
        })
    }
}

/// Format a string of source text. Idempotent: formatting the output again
/// returns it unchanged.
pub fn format_string(src: &str) -> Result<String, Error> {
    let mut ctx = Context::new(src)?;
    ctx.format()?;
    ctx.into_output()
}

/// Root driver. Seeds the output buffer with the source, runs the node
/// driver on the root, and enforces that the root stabilizes after at most
/// one rewrite.
pub fn format_tree(ctx: &mut Context) -> Result<(), EngineError> {
    if ctx.fmt_tree.is_some() {
        return Err(EngineError::Assertion(
            "format_tree invoked twice on one context".into(),
        ));
    }
    ctx.fmt_io
        .write_all(ctx.src_str.as_bytes())
        .map_err(|e| EngineError::Assertion(format!("seeding the output buffer failed: {e}")))?;
    ctx.fmt_io.set_position(0);

    let mut root = ctx.src_tree.clone();
    let mut rewrites = 0usize;
    loop {
        match format_node(ctx, &root)? {
            Outcome::Accepted => {
                let pos = ctx.fmt_io.position();
                if pos != root.span() {
                    return Err(EngineError::Assertion(format!(
                        "root accepted but the cursor is at {pos}, span is {}",
                        root.span()
                    )));
                }
                break;
            }
            Outcome::Replaced(new_root) => {
                rewrites += 1;
                // Whole-file rules must stabilize in a single application;
                // children handle their own fixed points.
                if rewrites > 1 {
                    return Err(EngineError::RootRewrite);
                }
                ctx.fmt_io.set_position(0);
                root = new_root;
            }
            Outcome::Deleted => return Err(EngineError::RootDeleted),
        }
    }
    if ctx.flags.assert && !validate_spans(&root) {
        return Err(EngineError::Assertion(
            "span conservation violated in the formatted tree".into(),
        ));
    }
    ctx.fmt_io.truncate(root.span());
    ctx.fmt_tree = Some(root);
    Ok(())
}

/// Per-node driver: the rule pipeline first, then dispatch on the kind.
pub fn format_node(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    let entry = ctx.fmt_io.position();
    for &(name, rule) in rules::PIPELINE {
        match rule(ctx, node)? {
            Outcome::Accepted => {
                if ctx.flags.assert && ctx.fmt_io.position() != entry {
                    return Err(EngineError::Assertion(format!(
                        "rule {name} accepted {:?} but moved the cursor",
                        node.kind()
                    )));
                }
            }
            Outcome::Replaced(new_node) => {
                debug!(rule = name, kind = ?node.kind(), pos = entry, "rewrote node");
                if ctx.flags.assert {
                    if ctx.fmt_io.position() != entry {
                        return Err(EngineError::Assertion(format!(
                            "rule {name} rewrote {:?} but left the cursor moved",
                            node.kind()
                        )));
                    }
                    if !validate_spans(&new_node) {
                        return Err(EngineError::Assertion(format!(
                            "rule {name} produced a subtree with inconsistent spans"
                        )));
                    }
                }
                return Ok(Outcome::Replaced(new_node));
            }
            Outcome::Deleted => return Ok(Outcome::Deleted),
        }
    }

    match node.kind() {
        // Composite forms always recurse.
        Kind::TopLevel
        | Kind::Block
        | Kind::Call
        | Kind::Parens
        | Kind::Tuple
        | Kind::Vect
        | Kind::Ref
        | Kind::Str
        | Kind::CmdStr
        | Kind::MacroCall
        | Kind::Generator => format_node_with_kids(ctx, node),
        // Keyword forms recurse unless this node is the keyword token.
        Kind::Module
        | Kind::Struct
        | Kind::Function
        | Kind::Return
        | Kind::If
        | Kind::ElseIf
        | Kind::Else
        | Kind::For
        | Kind::While
        | Kind::Begin
        | Kind::Let => {
            if node.flags().contains(NodeFlags::TRIVIA) {
                accept_verbatim(ctx, node)
            } else {
                format_node_with_kids(ctx, node)
            }
        }
        // Operator heads: composite for expressions, plain token otherwise.
        Kind::Op(_) | Kind::Dot => {
            if node.is_leaf() {
                accept_verbatim(ctx, node)
            } else {
                format_node_with_kids(ctx, node)
            }
        }
        // Terminals and trivia pass through verbatim.
        Kind::Whitespace
        | Kind::NewlineWs
        | Kind::Comment
        | Kind::Identifier
        | Kind::MacroName
        | Kind::Integer
        | Kind::HexInt
        | Kind::OctInt
        | Kind::BinInt
        | Kind::Float
        | Kind::StrText
        | Kind::DQuote
        | Kind::Backtick
        | Kind::Comma
        | Kind::Semi
        | Kind::OpenParen
        | Kind::CloseParen
        | Kind::OpenBracket
        | Kind::CloseBracket
        | Kind::End
        | Kind::In => accept_verbatim(ctx, node),
        Kind::Error => Err(EngineError::UnhandledKind {
            kind: node.kind(),
            partial: String::from_utf8_lossy(ctx.fmt_io.as_slice()).into_owned(),
        }),
    }
}

fn accept_verbatim(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    trace!(kind = ?node.kind(), span = node.span(), "accepted verbatim");
    ctx.fmt_io.advance(node.span());
    Ok(Outcome::Accepted)
}

/// Children driver: iterate the children with sibling context, re-running
/// each child until it is accepted. Produces a new parent when any child
/// changed, sharing every untouched subtree.
pub fn format_node_with_kids(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if node.is_leaf() {
        return Err(EngineError::Assertion(format!(
            "children driver invoked on leaf {:?}",
            node.kind()
        )));
    }
    let saved_prev = ctx.prev_sibling.take();
    let saved_next = ctx.next_sibling.take();
    let mut new_kids: Option<Vec<Node>> = None;
    let result = format_kids(ctx, node.verified_kids(), &mut new_kids);
    ctx.prev_sibling = saved_prev;
    ctx.next_sibling = saved_next;
    result?;
    match new_kids {
        Some(kids) => Ok(Outcome::Replaced(node.make_node(kids, node.tags()))),
        None => Ok(Outcome::Accepted),
    }
}

fn format_kids(
    ctx: &mut Context,
    kids: &[Node],
    new_kids: &mut Option<Vec<Node>>,
) -> Result<(), EngineError> {
    for i in 0..kids.len() {
        // The rewritten prefix feeds prev_sibling; next_sibling still comes
        // from the original sequence because its formatting has not
        // happened yet.
        ctx.prev_sibling = match new_kids.as_ref() {
            Some(nk) => nk.last().cloned(),
            None => i.checked_sub(1).map(|j| kids[j].clone()),
        };
        ctx.next_sibling = kids.get(i + 1).cloned();

        let mut kid = kids[i].clone();
        let fmt_pos = ctx.fmt_io.position();
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            if iterations > CHILD_ITERATION_LIMIT {
                return Err(EngineError::Convergence {
                    limit: CHILD_ITERATION_LIMIT,
                });
            }
            match format_node(ctx, &kid)? {
                Outcome::Accepted => {
                    let expected = fmt_pos + kid.span();
                    let pos = ctx.fmt_io.position();
                    if pos != expected {
                        return Err(EngineError::Assertion(format!(
                            "child {:?} accepted but the cursor is at {pos}, expected {expected}",
                            kid.kind()
                        )));
                    }
                    break;
                }
                Outcome::Replaced(new_kid) => {
                    ctx.fmt_io.set_position(fmt_pos);
                    if new_kids.is_none() {
                        *new_kids = Some(kids[..i].to_vec());
                    }
                    kid = new_kid;
                }
                Outcome::Deleted => return Err(EngineError::DeletedKid),
            }
        }
        if let Some(nk) = new_kids.as_mut() {
            nk.push(kid);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cst::Head;

    #[test]
    fn empty_input_is_a_fixed_point() {
        let mut ctx = Context::new("").unwrap();
        ctx.format().unwrap();
        let tree = ctx.fmt_tree().unwrap();
        assert_eq!(tree.span(), 0);
        assert!(tree.ptr_eq(&ctx.src_tree));
        assert!(ctx.output_bytes().is_empty());
    }

    #[test]
    fn untouched_input_round_trips_and_shares_the_tree() {
        let src = "f(a, b)\n";
        let mut ctx = Context::new(src).unwrap();
        ctx.format().unwrap();
        assert_eq!(ctx.output_bytes(), src.as_bytes());
        // No rule fired, so the output tree aliases the input tree.
        assert!(ctx.fmt_tree().unwrap().ptr_eq(&ctx.src_tree));
    }

    #[test]
    fn debug_flag_widens_to_verbose_and_assert() {
        let flags = Flags {
            debug: true,
            ..Flags::default()
        };
        let ctx = Context::with_flags("x\n", flags).unwrap();
        assert!(ctx.flags().verbose);
        assert!(ctx.flags().assert);
    }

    #[test]
    fn unhandled_kind_reports_the_partial_output() {
        // `$` lexes into an Error leaf, which no dispatch arm covers.
        let mut ctx = Context::new("x = 1\n$\n").unwrap();
        let err = ctx.format().unwrap_err();
        match err {
            Error::Engine(EngineError::UnhandledKind { kind, partial }) => {
                assert_eq!(kind, Kind::Error);
                assert!(partial.contains("x = 1"));
            }
            other => panic!("expected UnhandledKind, got {other:?}"),
        }
    }

    #[test]
    fn context_is_single_use() {
        let mut ctx = Context::new("x\n").unwrap();
        ctx.format().unwrap();
        let err = ctx.format().unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::Assertion(_))));
    }

    #[test]
    fn children_driver_rejects_leaves() {
        let mut ctx = Context::new("").unwrap();
        let leaf = Node::leaf(Head::from(Kind::Identifier), 1);
        let err = format_node_with_kids(&mut ctx, &leaf).unwrap_err();
        assert!(matches!(err, EngineError::Assertion(_)));
    }
}
