//! The rewrite rules — the *runestones*.
//!
//! Every rule is a pure function from `(Context, Node)` to an [`Outcome`].
//! A rule that has nothing to say returns `Accepted` without touching the
//! buffer. A rule that rewrites must splice exactly the new subtree's bytes
//! at the cursor, leave the cursor where it found it, and return
//! `Replaced`; applied to its own output it must then accept. The engine
//! knows nothing about any particular rule, only the pipeline order.
//!
//! Literal normalizations skip literals containing `_` digit separators,
//! and the spacing rules leave any operand list containing line breaks or
//! comments alone, so multiline expressions keep their layout.

use crate::cst::{
    infix_op_call_op, is_assignment, is_infix_op_call, op_prec, Head, Kind, Node, NodeFlags, Prec,
};
use crate::error::EngineError;
use crate::formatter::{Context, Outcome};

pub type Rule = fn(&mut Context, &Node) -> Result<Outcome, EngineError>;

/// The canonical pipeline. Order matters: the first rule to return a
/// non-accepting outcome wins the invocation.
pub const PIPELINE: &[(&str, Rule)] = &[
    ("trailing-whitespace", trim_trailing_whitespace),
    ("hex-literals", normalize_hex_literals),
    ("octal-literals", normalize_octal_literals),
    ("float-literals", normalize_float_literals),
    ("operator-spacing", spaces_around_operators),
    ("assignment-spacing", spaces_around_assignments),
    ("colon-spacing", no_spaces_around_colon),
    ("for-in", for_loop_uses_in),
];

/// Precedence classes that are written without surrounding spaces.
const NO_SPACE_PRECS: &[Prec] = &[Prec::Colon, Prec::Decl, Prec::Power];

/// Drop spaces and tabs sitting directly before a line break.
pub fn trim_trailing_whitespace(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if node.kind() != Kind::NewlineWs || !node.is_leaf() {
        return Ok(Outcome::Accepted);
    }
    let bytes = ctx.fmt_io.peek(node.span()).to_vec();
    let mut out = Vec::with_capacity(bytes.len());
    let mut pending: Vec<u8> = Vec::new();
    for &b in &bytes {
        match b {
            b' ' | b'\t' | b'\r' => pending.push(b),
            b'\n' => {
                // Keep a carriage return that is part of the line ending.
                if pending.last() == Some(&b'\r') {
                    out.push(b'\r');
                }
                pending.clear();
                out.push(b'\n');
            }
            _ => {
                out.append(&mut pending);
                out.push(b);
            }
        }
    }
    // Whatever is left is indentation for the next token.
    out.append(&mut pending);
    if out == bytes {
        return Ok(Outcome::Accepted);
    }
    ctx.fmt_io.replace_bytes(&out, node.span());
    Ok(Outcome::Replaced(Node::leaf_with_tags(
        node.head(),
        out.len(),
        node.tags(),
    )))
}

/// Lowercase hex digits and zero-pad to the width of the smallest unsigned
/// type that fits: 2, 4, 8, 16, or 32 digits.
pub fn normalize_hex_literals(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if node.kind() != Kind::HexInt || !node.is_leaf() {
        return Ok(Outcome::Accepted);
    }
    let bytes = ctx.fmt_io.peek(node.span()).to_vec();
    if bytes.contains(&b'_') {
        return Ok(Outcome::Accepted);
    }
    let digits: Vec<u8> = bytes[2..].iter().map(u8::to_ascii_lowercase).collect();
    let width = [2usize, 4, 8, 16, 32]
        .into_iter()
        .find(|w| *w >= digits.len());
    let mut out = b"0x".to_vec();
    if let Some(w) = width {
        out.resize(2 + w - digits.len(), b'0');
    }
    out.extend_from_slice(&digits);
    splice_leaf(ctx, node, &bytes, out)
}

/// Strip redundant leading zeros from octal literals.
pub fn normalize_octal_literals(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if node.kind() != Kind::OctInt || !node.is_leaf() {
        return Ok(Outcome::Accepted);
    }
    let bytes = ctx.fmt_io.peek(node.span()).to_vec();
    if bytes.contains(&b'_') {
        return Ok(Outcome::Accepted);
    }
    let digits = &bytes[2..];
    let kept = digits
        .iter()
        .position(|&b| b != b'0')
        .unwrap_or(digits.len() - 1);
    let mut out = b"0o".to_vec();
    out.extend_from_slice(&digits[kept..]);
    splice_leaf(ctx, node, &bytes, out)
}

/// Make the integral and fractional parts explicit (`1.` → `1.0`,
/// `.5` → `0.5`) and lowercase an `E` exponent. Mantissas without a dot
/// (pure exponent forms like `2e3`) are left as written.
pub fn normalize_float_literals(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if node.kind() != Kind::Float || !node.is_leaf() {
        return Ok(Outcome::Accepted);
    }
    let bytes = ctx.fmt_io.peek(node.span()).to_vec();
    if bytes.contains(&b'_') {
        return Ok(Outcome::Accepted);
    }
    let split = bytes
        .iter()
        .position(|&b| matches!(b, b'e' | b'E' | b'f'))
        .unwrap_or(bytes.len());
    let (mantissa, suffix) = bytes.split_at(split);
    let mut out = Vec::with_capacity(bytes.len() + 2);
    if mantissa.contains(&b'.') {
        if mantissa.first() == Some(&b'.') {
            out.push(b'0');
        }
        out.extend_from_slice(mantissa);
        if mantissa.last() == Some(&b'.') {
            out.push(b'0');
        }
    } else {
        out.extend_from_slice(mantissa);
    }
    if suffix.first() == Some(&b'E') {
        out.push(b'e');
        out.extend_from_slice(&suffix[1..]);
    } else {
        out.extend_from_slice(suffix);
    }
    splice_leaf(ctx, node, &bytes, out)
}

/// Exactly one space on each side of an infix operator, for the precedence
/// classes that are written spaced.
pub fn spaces_around_operators(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if !is_infix_op_call(node) {
        return Ok(Outcome::Accepted);
    }
    let Some(op) = infix_op_call_op(node) else {
        return Ok(Outcome::Accepted);
    };
    if operator_prec(op).is_some_and(|p| NO_SPACE_PRECS.contains(&p)) {
        return Ok(Outcome::Accepted);
    }
    respace(ctx, node, true)
}

/// Exactly one space on each side of an assignment operator.
pub fn spaces_around_assignments(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if !is_assignment(node) {
        return Ok(Outcome::Accepted);
    }
    respace(ctx, node, true)
}

/// No spaces around `:`, `::`, and `^`.
pub fn no_spaces_around_colon(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if !is_infix_op_call(node) {
        return Ok(Outcome::Accepted);
    }
    let Some(op) = infix_op_call_op(node) else {
        return Ok(Outcome::Accepted);
    };
    if !operator_prec(op).is_some_and(|p| NO_SPACE_PRECS.contains(&p)) {
        return Ok(Outcome::Accepted);
    }
    respace(ctx, node, false)
}

/// Loop and generator iterations are written with `in`: `for i = 1:3` and
/// `for i ∈ 1:3` both become `for i in 1:3`, with single spaces around the
/// keyword.
pub fn for_loop_uses_in(ctx: &mut Context, node: &Node) -> Result<Outcome, EngineError> {
    if !matches!(node.kind(), Kind::For | Kind::Generator)
        || node.is_leaf()
        || node.flags().contains(NodeFlags::TRIVIA)
    {
        return Ok(Outcome::Accepted);
    }
    let kids = node.verified_kids();
    let Some(kw_idx) = kids
        .iter()
        .position(|k| k.kind() == Kind::For && k.flags().contains(NodeFlags::TRIVIA))
    else {
        return Ok(Outcome::Accepted);
    };
    let Some(rel) = kids[kw_idx + 1..].iter().position(|k| !k.is_trivia()) else {
        return Ok(Outcome::Accepted);
    };
    let iter_idx = kw_idx + 1 + rel;
    let iteration = &kids[iter_idx];
    let offset: usize = kids[..iter_idx].iter().map(Node::span).sum();
    match rewrite_iteration(ctx, iteration, offset)? {
        None => Ok(Outcome::Accepted),
        Some(new_iteration) => {
            let mut new_kids = kids.to_vec();
            new_kids[iter_idx] = new_iteration;
            Ok(Outcome::Replaced(node.make_node(new_kids, node.tags())))
        }
    }
}

/// Rewrite one iteration specifier to the `in` form, splicing its window in
/// place. `offset` is the iteration's byte offset inside the node at the
/// cursor. Returns the replacement child, or `None` when nothing changes.
fn rewrite_iteration(
    ctx: &mut Context,
    iteration: &Node,
    offset: usize,
) -> Result<Option<Node>, EngineError> {
    let needs_rewrite = if is_assignment(iteration) {
        true
    } else if is_infix_op_call(iteration) {
        match infix_op_call_op(iteration) {
            Some(op) if op.is_leaf() && op.kind() == Kind::Op(Prec::Comparison) => {
                let kids = iteration.verified_kids();
                let op_off = child_offset(kids, op).unwrap_or(0);
                let abs = ctx.fmt_io.position() + offset + op_off;
                &ctx.fmt_io.as_slice()[abs..abs + op.span()] == "∈".as_bytes()
            }
            _ => false,
        }
    } else {
        false
    };
    if !needs_rewrite {
        return Ok(None);
    }

    let kids = iteration.verified_kids();
    let non_ws: Vec<&Node> = kids.iter().filter(|k| !k.is_whitespace()).collect();
    // Anything but `lhs op rhs` is out of this rule's reach.
    if non_ws.len() != 3 {
        return Ok(None);
    }
    let (lhs, rhs) = (non_ws[0], non_ws[2]);
    let base = ctx.fmt_io.position() + offset;
    let lhs_off = child_offset(kids, lhs).unwrap_or(0);
    let rhs_off = child_offset(kids, rhs).unwrap_or(0);
    let buf = ctx.fmt_io.as_slice();
    let mut bytes = buf[base + lhs_off..base + lhs_off + lhs.span()].to_vec();
    bytes.extend_from_slice(b" in ");
    bytes.extend_from_slice(&buf[base + rhs_off..base + rhs_off + rhs.span()]);

    let space = || Node::leaf(Kind::Whitespace.into(), 1);
    let new_iteration = Node::new(
        Head::new(Kind::Call, NodeFlags::INFIX),
        vec![
            lhs.clone(),
            space(),
            Node::leaf(Kind::In.into(), 2),
            space(),
            rhs.clone(),
        ],
    );

    let entry = ctx.fmt_io.position();
    ctx.fmt_io.set_position(entry + offset);
    ctx.fmt_io.replace_bytes(&bytes, iteration.span());
    ctx.fmt_io.set_position(entry);
    Ok(Some(new_iteration))
}

// -- shared helpers ---------------------------------------------------------

/// Finish a leaf-literal rule: accept when unchanged, otherwise splice and
/// hand back the resized leaf.
fn splice_leaf(
    ctx: &mut Context,
    node: &Node,
    old: &[u8],
    new: Vec<u8>,
) -> Result<Outcome, EngineError> {
    if new == old {
        return Ok(Outcome::Accepted);
    }
    ctx.fmt_io.replace_bytes(&new, node.span());
    Ok(Outcome::Replaced(Node::leaf_with_tags(
        node.head(),
        new.len(),
        node.tags(),
    )))
}

/// Rebuild a binary expression's children with canonical spacing: operands
/// and operator joined by single spaces, or by nothing. Bails on operand
/// lists containing line breaks or comments.
fn respace(ctx: &mut Context, node: &Node, spaced: bool) -> Result<Outcome, EngineError> {
    let kids = node.verified_kids();
    if kids
        .iter()
        .any(|k| matches!(k.kind(), Kind::NewlineWs | Kind::Comment))
    {
        return Ok(Outcome::Accepted);
    }
    let bytes = ctx.fmt_io.peek(node.span()).to_vec();
    let mut new_bytes = Vec::with_capacity(bytes.len());
    let mut new_kids = Vec::with_capacity(kids.len());
    let mut offset = 0usize;
    for kid in kids {
        let slice = &bytes[offset..offset + kid.span()];
        offset += kid.span();
        if kid.is_whitespace() {
            continue;
        }
        if !new_kids.is_empty() && spaced {
            new_kids.push(Node::leaf(Kind::Whitespace.into(), 1));
            new_bytes.push(b' ');
        }
        new_kids.push(kid.clone());
        new_bytes.extend_from_slice(slice);
    }
    if new_bytes == bytes {
        return Ok(Outcome::Accepted);
    }
    ctx.fmt_io.replace_bytes(&new_bytes, node.span());
    Ok(Outcome::Replaced(node.make_node(new_kids, node.tags())))
}

/// Byte offset of `target` inside `kids`, by identity.
fn child_offset(kids: &[Node], target: &Node) -> Option<usize> {
    let mut offset = 0;
    for kid in kids {
        if kid.ptr_eq(target) {
            return Some(offset);
        }
        offset += kid.span();
    }
    None
}

/// Precedence of an operator node, plain leaf or dotted composite.
fn operator_prec(op: &Node) -> Option<Prec> {
    if op.is_leaf() {
        return op_prec(op.kind());
    }
    op.verified_kids()
        .iter()
        .filter(|k| !k.is_trivia())
        .nth(1)
        .and_then(|k| op_prec(k.kind()))
}
