use crate::cst::Node;

fn debug_tree(node: &Node, source: &str, offset: usize, indent: usize) {
    let indent_str = "  ".repeat(indent);
    if node.is_leaf() {
        let text = &source[offset..offset + node.span()];
        let text_display = if text.contains('\n') {
            format!("{:?}", text)
        } else {
            text.to_string()
        };
        println!(
            "{}{:?}({:?}) @{}..{}: {}",
            indent_str,
            node.kind(),
            node.flags(),
            offset,
            offset + node.span(),
            text_display
        );
    } else {
        println!(
            "{}{:?} @{}..{}",
            indent_str,
            node.kind(),
            offset,
            offset + node.span()
        );
        let mut kid_offset = offset;
        for kid in node.verified_kids() {
            debug_tree(kid, source, kid_offset, indent + 1);
            kid_offset += kid.span();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn debug_loop_with_nested_call() {
        let source = "for i = 1:3\n    f(i)\nend\n";

        let tree = parse(source).unwrap();
        debug_tree(&tree, source, 0, 0);
    }
}
