//! Lossless concrete syntax tree.
//!
//! Every byte of the source is covered by exactly one leaf, including
//! whitespace and comments, so a pre-order walk of the leaves reproduces the
//! input. Nodes are immutable handles with structural sharing: rewriting one
//! child builds a fresh spine and aliases every untouched subtree.
//!
//! Byte content is *not* stored in the tree. A leaf only knows how many bytes
//! it covers; the bytes themselves live in the source string and, during
//! formatting, in the output buffer at the position that mirrors the
//! traversal.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

/// Operator precedence classes, loosest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prec {
    Assignment,
    LazyOr,
    LazyAnd,
    Comparison,
    Pipe,
    Colon,
    Plus,
    Times,
    Rational,
    Power,
    Decl,
}

impl Prec {
    /// Numeric binding level for precedence climbing.
    pub(crate) fn level(self) -> u8 {
        self as u8 + 1
    }
}

/// Syntactic categories. The set is closed; the formatter fails loudly on a
/// kind its dispatch table does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    // Composite-only forms.
    TopLevel,
    Block,
    Call,
    Parens,
    Tuple,
    Vect,
    Ref,
    Str,
    CmdStr,
    MacroCall,
    Generator,
    // Keyword-introduced forms. The introducing keyword token carries the
    // same kind, flagged as trivia.
    Module,
    Struct,
    Function,
    Return,
    If,
    ElseIf,
    Else,
    For,
    While,
    Begin,
    Let,
    // Keyword tokens that never head a composite. `end` is pure trivia;
    // `in` is the membership operator.
    End,
    In,
    // Operators. `Dot` is both the `.` token and the head of field access
    // and dotted-operator composites.
    Op(Prec),
    Dot,
    // Terminals.
    Identifier,
    MacroName,
    Integer,
    HexInt,
    OctInt,
    BinInt,
    Float,
    StrText,
    DQuote,
    Backtick,
    Comma,
    Semi,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Whitespace,
    NewlineWs,
    Comment,
    // Lenient-lexing placeholder for input the parser does not understand.
    Error,
}

bitflags! {
    /// Head flags refining a [`Kind`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Syntactic noise: keyword tokens, reproduced verbatim.
        const TRIVIA = 1 << 0;
        /// Infix operator call (`a + b`).
        const INFIX = 1 << 1;
        /// Prefix operator call (`-a`).
        const PREFIX = 1 << 2;
    }
}

bitflags! {
    /// Engine-level annotations. The drivers carry these through rewrites
    /// without interpreting them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TagBits: u8 {
        const INDENT = 1 << 0;
        const DEDENT = 1 << 1;
    }
}

/// A node's kind tag together with its flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub kind: Kind,
    pub flags: NodeFlags,
}

impl Head {
    pub fn new(kind: Kind, flags: NodeFlags) -> Head {
        Head { kind, flags }
    }
}

impl From<Kind> for Head {
    fn from(kind: Kind) -> Head {
        Head::new(kind, NodeFlags::empty())
    }
}

#[derive(Debug)]
struct NodeData {
    head: Head,
    span: usize,
    kids: Option<Vec<Node>>,
    tags: TagBits,
}

/// Immutable, cheaply clonable handle to a tree node.
#[derive(Clone)]
pub struct Node {
    data: Rc<NodeData>,
}

impl Node {
    /// A terminal covering `span` bytes.
    pub fn leaf(head: Head, span: usize) -> Node {
        Node {
            data: Rc::new(NodeData {
                head,
                span,
                kids: None,
                tags: TagBits::empty(),
            }),
        }
    }

    pub fn leaf_with_tags(head: Head, span: usize, tags: TagBits) -> Node {
        Node {
            data: Rc::new(NodeData {
                head,
                span,
                kids: None,
                tags,
            }),
        }
    }

    /// A composite; the span is the sum of the children's spans.
    pub fn new(head: Head, kids: Vec<Node>) -> Node {
        let span = kids.iter().map(Node::span).sum();
        Node {
            data: Rc::new(NodeData {
                head,
                span,
                kids: Some(kids),
                tags: TagBits::empty(),
            }),
        }
    }

    /// New node with this node's head, the given children, and the given
    /// tags. Spans are recomputed here and nowhere else on the hot path.
    pub fn make_node(&self, kids: Vec<Node>, tags: TagBits) -> Node {
        let span = kids.iter().map(Node::span).sum();
        Node {
            data: Rc::new(NodeData {
                head: self.head(),
                span,
                kids: Some(kids),
                tags,
            }),
        }
    }

    pub fn head(&self) -> Head {
        self.data.head
    }

    pub fn kind(&self) -> Kind {
        self.data.head.kind
    }

    pub fn flags(&self) -> NodeFlags {
        self.data.head.flags
    }

    pub fn span(&self) -> usize {
        self.data.span
    }

    pub fn tags(&self) -> TagBits {
        self.data.tags
    }

    pub fn is_leaf(&self) -> bool {
        self.data.kids.is_none()
    }

    pub fn kids(&self) -> Option<&[Node]> {
        self.data.kids.as_deref()
    }

    /// The child sequence. Calling this on a leaf is a programmer error.
    pub fn verified_kids(&self) -> &[Node] {
        self.data
            .kids
            .as_deref()
            .unwrap_or_else(|| panic!("verified_kids called on leaf {:?}", self.kind()))
    }

    /// Leftmost terminal under this node.
    pub fn first_leaf(&self) -> &Node {
        let mut node = self;
        while let Some(kids) = node.kids() {
            node = kids
                .first()
                .unwrap_or_else(|| panic!("first_leaf on childless {:?}", self.kind()));
        }
        node
    }

    /// Rightmost terminal under this node.
    pub fn last_leaf(&self) -> &Node {
        let mut node = self;
        while let Some(kids) = node.kids() {
            node = kids
                .last()
                .unwrap_or_else(|| panic!("last_leaf on childless {:?}", self.kind()));
        }
        node
    }

    /// Number of non-trivia children; 0 for leaves.
    pub fn meta_nargs(&self) -> usize {
        match self.kids() {
            Some(kids) => kids.iter().filter(|k| !k.is_trivia()).count(),
            None => 0,
        }
    }

    /// First child that is not whitespace. Fails if there is none.
    pub fn first_non_whitespace_child(&self) -> &Node {
        self.verified_kids()
            .iter()
            .find(|k| !k.is_whitespace())
            .unwrap_or_else(|| panic!("no non-whitespace child in {:?}", self.kind()))
    }

    /// New tree with the leftmost terminal swapped out; ancestor spans are
    /// updated along the rebuilt spine.
    pub fn replace_first_leaf(&self, leaf: Node) -> Node {
        if self.is_leaf() {
            return leaf;
        }
        let kids = self.verified_kids();
        let mut new_kids = kids.to_vec();
        new_kids[0] = kids[0].replace_first_leaf(leaf);
        self.make_node(new_kids, self.tags())
    }

    pub fn is_whitespace(&self) -> bool {
        matches!(self.kind(), Kind::Whitespace | Kind::NewlineWs)
    }

    /// Whitespace, comments, and trivia-flagged keyword tokens.
    pub fn is_trivia(&self) -> bool {
        self.is_whitespace()
            || self.kind() == Kind::Comment
            || self.flags().contains(NodeFlags::TRIVIA)
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.kind(), self.span())?;
        if let Some(kids) = self.kids() {
            f.debug_list().entries(kids).finish()?;
        }
        Ok(())
    }
}

/// Precedence class of an operator token kind.
pub fn op_prec(kind: Kind) -> Option<Prec> {
    match kind {
        Kind::Op(p) => Some(p),
        Kind::In => Some(Prec::Comparison),
        _ => None,
    }
}

/// Terminal carrying an operator.
pub fn is_operator_leaf(node: &Node) -> bool {
    node.is_leaf() && op_prec(node.kind()).is_some()
}

/// An assignment expression. Deliberately the narrow form: a bare assignment
/// operator token does not count.
pub fn is_assignment(node: &Node) -> bool {
    !node.is_leaf() && op_prec(node.kind()) == Some(Prec::Assignment)
}

/// A call node carrying the infix flag. Calls containing operator children
/// without the flag are not infix calls.
pub fn is_infix_op_call(node: &Node) -> bool {
    node.kind() == Kind::Call && node.flags().contains(NodeFlags::INFIX)
}

/// Comparison operator, plain (`<`) or dotted (`.<`). The dotted form is a
/// `.` composite whose second non-trivia child is itself a comparison leaf.
pub fn is_comparison_leaf(node: &Node) -> bool {
    if node.is_leaf() {
        return op_prec(node.kind()) == Some(Prec::Comparison);
    }
    node.kind() == Kind::Dot
        && node.meta_nargs() == 2
        && node
            .verified_kids()
            .iter()
            .filter(|k| !k.is_trivia())
            .nth(1)
            .is_some_and(is_comparison_leaf)
}

/// Dotted operator composite of any precedence class (`.+`, `.==`).
pub fn is_dotted_operator(node: &Node) -> bool {
    node.kind() == Kind::Dot
        && !node.is_leaf()
        && node.meta_nargs() == 2
        && node
            .verified_kids()
            .iter()
            .filter(|k| !k.is_trivia())
            .nth(1)
            .is_some_and(is_operator_leaf)
}

/// The operator child of an infix call. Scans strictly left to right: the
/// first non-whitespace child is the left operand, the next operator child
/// is the operator.
pub fn infix_op_call_op(node: &Node) -> Option<&Node> {
    if !is_infix_op_call(node) {
        return None;
    }
    let mut kids = node.verified_kids().iter();
    kids.by_ref().find(|k| !k.is_whitespace())?;
    kids.find(|k| is_operator_leaf(k) || is_dotted_operator(k))
}

/// Check that every composite's span equals the sum of its children's spans.
pub fn validate_spans(node: &Node) -> bool {
    match node.kids() {
        None => true,
        Some(kids) => {
            node.span() == kids.iter().map(Node::span).sum::<usize>()
                && kids.iter().all(validate_spans)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(span: usize) -> Node {
        Node::leaf(Kind::Identifier.into(), span)
    }

    fn ws(span: usize) -> Node {
        Node::leaf(Kind::Whitespace.into(), span)
    }

    fn op_leaf(prec: Prec, span: usize) -> Node {
        Node::leaf(Kind::Op(prec).into(), span)
    }

    fn infix_call(kids: Vec<Node>) -> Node {
        Node::new(Head::new(Kind::Call, NodeFlags::INFIX), kids)
    }

    #[test]
    fn composite_span_is_sum_of_kids() {
        let call = infix_call(vec![ident(1), ws(1), op_leaf(Prec::Plus, 1), ws(1), ident(1)]);
        assert_eq!(call.span(), 5);
        assert!(validate_spans(&call));
    }

    #[test]
    fn make_node_recomputes_span_and_keeps_head() {
        let call = infix_call(vec![ident(1), op_leaf(Prec::Plus, 1), ident(1)]);
        let bigger = call.make_node(
            vec![ident(1), ws(1), op_leaf(Prec::Plus, 1), ws(1), ident(1)],
            call.tags(),
        );
        assert_eq!(bigger.span(), 5);
        assert_eq!(bigger.head(), call.head());
    }

    #[test]
    fn replace_first_leaf_updates_spans_and_shares_siblings() {
        let rhs = ident(1);
        let call = infix_call(vec![ident(2), op_leaf(Prec::Plus, 1), rhs.clone()]);
        let replaced = call.replace_first_leaf(ident(4));
        assert_eq!(replaced.span(), 6);
        assert!(replaced.verified_kids()[2].ptr_eq(&rhs));
    }

    #[test]
    fn meta_nargs_skips_trivia() {
        let kw = Node::leaf(Head::new(Kind::For, NodeFlags::TRIVIA), 3);
        let node = Node::new(Kind::For.into(), vec![kw, ws(1), ident(1), ws(1), ident(3)]);
        assert_eq!(node.meta_nargs(), 2);
        assert_eq!(ident(1).meta_nargs(), 0);
    }

    #[test]
    fn first_and_last_leaf_walk_the_edges() {
        let inner = infix_call(vec![ident(1), op_leaf(Prec::Times, 1), ident(1)]);
        let outer = infix_call(vec![inner, op_leaf(Prec::Plus, 1), ident(2)]);
        assert_eq!(outer.first_leaf().kind(), Kind::Identifier);
        assert_eq!(outer.first_leaf().span(), 1);
        assert_eq!(outer.last_leaf().span(), 2);
    }

    #[test]
    fn dotted_comparison_is_recursive() {
        let dot = Node::leaf(Kind::Dot.into(), 1);
        let lt = op_leaf(Prec::Comparison, 1);
        let dotted = Node::new(Kind::Dot.into(), vec![dot.clone(), lt]);
        assert!(is_comparison_leaf(&dotted));

        let plus = op_leaf(Prec::Plus, 1);
        let dotted_plus = Node::new(Kind::Dot.into(), vec![dot, plus]);
        assert!(!is_comparison_leaf(&dotted_plus));
        assert!(is_dotted_operator(&dotted_plus));
    }

    #[test]
    fn infix_op_extraction_scans_left_to_right() {
        let call = infix_call(vec![
            ws(1),
            ident(1),
            ws(1),
            op_leaf(Prec::Plus, 1),
            ws(1),
            ident(1),
        ]);
        let op = infix_op_call_op(&call).unwrap();
        assert_eq!(op.kind(), Kind::Op(Prec::Plus));

        // Same shape without the infix flag is not an infix call.
        let plain = Node::new(
            Kind::Call.into(),
            vec![ident(1), op_leaf(Prec::Plus, 1), ident(1)],
        );
        assert!(infix_op_call_op(&plain).is_none());
    }

    #[test]
    fn assignment_is_the_narrow_form() {
        let assign = Node::new(
            Kind::Op(Prec::Assignment).into(),
            vec![ident(1), op_leaf(Prec::Assignment, 1), ident(1)],
        );
        assert!(is_assignment(&assign));
        assert!(!is_assignment(&op_leaf(Prec::Assignment, 1)));
    }
}
