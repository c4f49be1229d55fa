use runefmt::format_string;
use similar::TextDiff;
use std::fs;
use std::path::{Path, PathBuf};

fn fmt(src: &str) -> String {
    format_string(src).unwrap()
}

/// Expected output for an input fixture. Inputs are numbered variants of one
/// expected file: `loops_1.input` and `loops_2.input` both pair with
/// `loops.jl` next to them.
fn expected_for(input: &Path) -> Option<PathBuf> {
    let stem = input.file_stem()?.to_str()?;
    let (base, _) = stem.rsplit_once('_')?;
    let expected = input.with_file_name(format!("{base}.jl"));
    expected.exists().then_some(expected)
}

#[test]
fn case_files_format_to_their_expected_output() {
    let mut checked = 0;
    let mut mismatches = String::new();

    for entry in fs::read_dir("tests/cases").unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("input") {
            continue;
        }
        let expected_path = expected_for(&path)
            .unwrap_or_else(|| panic!("no expected file for {}", path.display()));

        let input = fs::read_to_string(&path).unwrap();
        let expected = fs::read_to_string(&expected_path).unwrap();
        let formatted = fmt(&input);
        assert_eq!(
            fmt(&formatted),
            formatted,
            "{} does not reformat cleanly",
            path.display()
        );
        if formatted != expected {
            let diff = TextDiff::from_lines(&expected, &formatted);
            mismatches.push_str(&format!(
                "{}:\n{}\n",
                path.display(),
                diff.unified_diff().header("expected", "formatted")
            ));
        }
        checked += 1;
    }

    assert!(checked > 0, "no fixtures under tests/cases");
    assert!(mismatches.is_empty(), "fixture mismatches:\n{mismatches}");
}

#[test]
fn empty_input_formats_to_itself() {
    assert_eq!(fmt(""), "");
}

#[test]
fn leading_whitespace_survives_trailing_is_trimmed() {
    assert_eq!(fmt("  x  \n"), "  x\n");
}

#[test]
fn hex_literals_are_lowercased_and_padded() {
    assert_eq!(fmt("0xAb\n"), "0xab\n");
    assert_eq!(fmt("a = 0xFFF\n"), "a = 0x0fff\n");
    // Digit separators opt a literal out of normalization.
    assert_eq!(fmt("a = 0xAB_CD\n"), "a = 0xAB_CD\n");
}

#[test]
fn octal_literals_drop_redundant_zeros() {
    assert_eq!(fmt("b = 0o017\n"), "b = 0o17\n");
    assert_eq!(fmt("b = 0o000\n"), "b = 0o0\n");
}

#[test]
fn float_literals_get_both_parts() {
    assert_eq!(fmt("c = 1.5E3\n"), "c = 1.5e3\n");
    assert_eq!(fmt("d = .5\n"), "d = 0.5\n");
    assert_eq!(fmt("e = 1.\n"), "e = 1.0\n");
    // Pure exponent forms are left as written.
    assert_eq!(fmt("g = 2e3\n"), "g = 2e3\n");
}

#[test]
fn operator_spacing_inserts_single_spaces() {
    let formatted = fmt("a+b");
    assert_eq!(formatted, "a + b");
    assert_eq!(fmt("x=1+2*3\n"), "x = 1 + 2 * 3\n");
    assert_eq!(fmt("a  ==  b\n"), "a == b\n");
}

#[test]
fn formatted_tree_span_matches_output() {
    let mut ctx = runefmt::Context::new("a+b").unwrap();
    ctx.format().unwrap();
    assert_eq!(ctx.fmt_tree().unwrap().span(), 5);
    assert_eq!(ctx.output_bytes(), b"a + b");
}

#[test]
fn colon_and_friends_lose_their_spaces() {
    assert_eq!(fmt("y = a : b\n"), "y = a:b\n");
    assert_eq!(fmt("z = 2 ^ 8\n"), "z = 2^8\n");
    assert_eq!(fmt("p :: Int\n"), "p::Int\n");
}

#[test]
fn dotted_operators_space_like_their_base() {
    assert_eq!(fmt("a.==b\n"), "a .== b\n");
}

#[test]
fn for_loops_use_in() {
    assert_eq!(fmt("for i=1:3\nend"), "for i in 1:3\nend");
    assert_eq!(fmt("for i ∈ 1:3\nend\n"), "for i in 1:3\nend\n");
    // Already canonical input is untouched.
    assert_eq!(fmt("for i in 1:3\nend\n"), "for i in 1:3\nend\n");
}

#[test]
fn generators_use_in_too() {
    assert_eq!(fmt("v = [f(x) for x = xs]\n"), "v = [f(x) for x in xs]\n");
}

#[test]
fn untouched_siblings_are_shared_between_trees() {
    let mut ctx = runefmt::Context::new("a+b\nf(x)\n").unwrap();
    ctx.format().unwrap();
    let src_kids = ctx.src_tree().verified_kids();
    let fmt_kids = ctx.fmt_tree().unwrap().verified_kids();
    // The rewritten call is a fresh node; its untouched siblings alias the
    // input tree.
    assert!(!fmt_kids[0].ptr_eq(&src_kids[0]));
    assert!(fmt_kids[2].ptr_eq(&src_kids[2]));
    assert!(fmt_kids[3].ptr_eq(&src_kids[3]));
}

#[test]
fn multiline_operands_keep_their_layout() {
    let src = "x = f(\n    a,\n    b,\n)\n";
    assert_eq!(fmt(src), src);
}

#[test]
fn comments_are_preserved_verbatim() {
    let src = "a = 1 # the answer\n#= block\ncomment =#\nb = 2\n";
    assert_eq!(fmt(src), src);
}

#[test]
fn unparseable_bytes_are_refused() {
    let err = format_string("x = 1\n$\n").unwrap_err();
    assert!(err.to_string().contains("unhandled syntax kind"));
}

#[test]
fn formatting_is_idempotent_across_a_corpus() {
    let corpus = [
        "",
        "x\n",
        "  x  \n",
        "a+b\n",
        "x=1+2*3\n",
        "a = 0xAb + 0o017 + 1.5E3\n",
        "for i=1:3\n    println(i)\nend\n",
        "for i ∈ 1:3\nend\n",
        "while a ≤ b\n    a += 1\nend\n",
        "if a < b\n    c()\nelseif d\n    e()\nelse\n    g()\nend\n",
        "function f(x, y)\n    return x + y\nend\n",
        "module M\nstruct P\n    x::Int\nend\nend\n",
        "v = [f(x) for x = xs]\n",
        "s = \"a string $(interp)\"\nc = `a command`\n",
        "@test 1+1 == 2\n",
        "t = (1, 2, 3)\nr = m[i]\n",
        "a .== b\n",
        "let q = 1\n    q ^ 2\nend\n",
        "begin\n    nothing\nend\n",
    ];
    for src in corpus {
        let once = fmt(src);
        let twice = fmt(&once);
        assert_eq!(once, twice, "not idempotent for {src:?}");
    }
}
