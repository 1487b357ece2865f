//! Integration tests for the passage parser

use pretty_assertions::assert_eq;
use weft::template::{walk_all, ExprTemplate, MacroArgs, PostscriptOp, ScopeKind};
use weft::{parse, NodeTemplate, NoMacros, Registry};

fn parse_with_builtins(source: &str) -> Vec<NodeTemplate> {
    let registry = Registry::with_builtins();
    match parse(source, "Test", 1, &registry) {
        Ok(parsed) => parsed.templates,
        Err(err) => panic!("unexpected parse error: {}", err),
    }
}

fn first_expr(nodes: &[NodeTemplate]) -> &ExprTemplate {
    nodes
        .iter()
        .find_map(|n| match n {
            NodeTemplate::Expr(e) => Some(e),
            _ => None,
        })
        .expect("no expression node")
}

fn call_args(expr: &ExprTemplate) -> Vec<String> {
    match expr.ops.last() {
        Some(PostscriptOp::Call { args, .. }) => args.iter().map(|a| a.code.clone()).collect(),
        other => panic!("expected a call, got {:?}", other),
    }
}

/// Passage texts covering every construct, plus a few that fail to parse.
const FIXTURES: &[&str] = &[
    "",
    "plain text\n\nsecond paragraph",
    "<p class=\"x\">Hi $name</p>\n@if($a) {yes} @else {no}\n[[Next]] @for(_i of $list) {_i}",
    "<div#main.wide.tall data-n=(1 + 2) hidden>x<br>y</div>",
    "<style>p { color: red }</style>",
    "$obj.list[0, _i](1, 'two').name{body}",
    "@(_a = 1, _a + 1) @print(`t ${$x}`, /re[)]/g)",
    "@switch($n) @case(1, 2) {a} @default {b}",
    "[[text->dest]] [[dest<-text]] [[text|dest]]",
    "a // comment\nb /* block\ncomment */ c \\\nd \\$e",
    "<b>unclosed",
    "@if(true) {open",
    "[[a->b->c]]",
    "\\q",
];

// ============================================================================
// Structure
// ============================================================================

mod structure {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_is_deterministic() {
        let registry = Registry::with_builtins();
        for source in FIXTURES {
            let first = parse(source, "P", 3, &registry);
            let second = parse(source, "P", 3, &registry);
            assert_eq!(first, second, "re-parse differs for {:?}", source);
        }
    }

    #[test]
    fn test_start_line_offsets_locations() {
        let nodes = parse_with_builtins("a\nb $x");
        let expr = first_expr(&nodes);
        assert_eq!(expr.loc.line, 2);

        let parsed = parse("a\nb $x", "P", 10, &NoMacros).unwrap();
        assert_eq!(first_expr(&parsed.templates).loc.line, 11);
    }

    #[test]
    fn test_walk_visits_nested_nodes() {
        let nodes = parse_with_builtins("<div><b>$x</b></div>@if(true) {_y}");
        let mut exprs = Vec::new();
        walk_all(&nodes, &mut |n| {
            if let NodeTemplate::Expr(e) = n {
                exprs.push(e.describe());
            }
        });
        assert_eq!(exprs, vec!["$x".to_string(), "_y".to_string()]);
    }

    #[test]
    fn test_chains_only_for_registered_macros() {
        let nodes = parse_with_builtins("@if($a) {A} @else {B}");
        assert_eq!(nodes.len(), 1);
        assert!(matches!(nodes[0], NodeTemplate::MacroChain(_)));

        // Without registry metadata the same text is two plain references.
        let parsed = parse("@if($a) {A} @else {B}", "P", 1, &NoMacros).unwrap();
        let exprs = parsed
            .templates
            .iter()
            .filter(|n| matches!(n, NodeTemplate::Expr(_)))
            .count();
        assert_eq!(exprs, 2);
    }

    #[test]
    fn test_for_binding_and_iterable() {
        let nodes = parse_with_builtins("@for(_item of $bag) {_item}");
        let NodeTemplate::MacroChain(chain) = &nodes[0] else {
            panic!("expected chain");
        };
        let MacroArgs::Iteration { binding, iterable } = &chain.head().args else {
            panic!("expected iteration args");
        };
        assert_eq!(binding, "item");
        assert_eq!(iterable.code, "story.bag");
        assert_eq!(iterable.raw, "$bag");
    }
}

// ============================================================================
// Embedded expressions
// ============================================================================

mod expressions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sigils_are_rewritten() {
        let nodes = parse_with_builtins("@print($a + _b * @limit)");
        let expr = first_expr(&nodes);
        assert_eq!(expr.scope, ScopeKind::Constants);
        assert_eq!(call_args(expr), vec!["story.a + temp.b * constants.limit"]);
    }

    #[test]
    fn test_top_level_commas_split_arguments() {
        let nodes = parse_with_builtins("@print($f(1, 2), [3, 4], {a: 5, b: 6})");
        let args = call_args(first_expr(&nodes));
        assert_eq!(args, vec!["story.f(1, 2)", "[3, 4]", "{a: 5, b: 6}"]);
    }

    #[test]
    fn test_division_and_regex_are_told_apart() {
        let nodes = parse_with_builtins("@print($a / 2 / $b)");
        assert_eq!(call_args(first_expr(&nodes)), vec!["story.a / 2 / story.b"]);

        let nodes = parse_with_builtins("@print($s.replace(/[)$]/g, \"\"))");
        assert_eq!(call_args(first_expr(&nodes)), vec!["story.s.replace(/[)$]/g, \"\")"]);
    }

    #[test]
    fn test_sigils_inside_strings_are_kept() {
        let nodes = parse_with_builtins("@print(\"costs $5\", 'a_b')");
        assert_eq!(call_args(first_expr(&nodes)), vec!["\"costs $5\"", "'a_b'"]);
    }

    #[test]
    fn test_unterminated_string_aborts() {
        let registry = Registry::with_builtins();
        let err = parse("ok\n@print(\"open)", "P", 1, &registry).unwrap_err();
        assert_eq!(err.line, 2);
    }
}

// ============================================================================
// Failures and warnings
// ============================================================================

mod failures {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unterminated_body_is_one_error() {
        let registry = Registry::with_builtins();
        let err = parse("line one\n@if(true) {never closed", "P", 1, &registry).unwrap_err();
        assert_eq!(err.passage, "P");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_banned_tags() {
        for tag in ["script", "iframe", "object"] {
            let source = format!("<{}>x</{}>", tag, tag);
            assert!(parse(&source, "P", 1, &NoMacros).is_err(), "<{}> should be banned", tag);
        }
    }

    #[test]
    fn test_duplicate_attribute_is_a_warning() {
        let parsed = parse("<span id=\"a\" id=\"b\">x</span>", "P", 1, &NoMacros).unwrap();
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.templates.len(), 1);
    }

    #[test]
    fn test_deeply_nested_elements_are_one_error() {
        let source = format!("{}x{}", "<b>".repeat(3000), "</b>".repeat(3000));
        let err = parse(&source, "P", 1, &Registry::with_builtins()).unwrap_err();
        assert!(err.message.contains("nested too deeply"), "{}", err.message);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_deeply_nested_bodies_are_one_error() {
        let source = format!("{}x{}", "@if(true) {".repeat(3000), "}".repeat(3000));
        let err = parse(&source, "P", 1, &Registry::with_builtins()).unwrap_err();
        assert!(err.message.contains("nested too deeply"), "{}", err.message);
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let source = format!("{}x{}", "<i>".repeat(40), "</i>".repeat(40));
        assert!(parse(&source, "P", 1, &NoMacros).is_ok());
    }

    #[test]
    fn test_trailing_backslash_is_an_escaped_line_break() {
        let parsed = parse("first\\\nsecond\\", "P", 1, &NoMacros).unwrap();
        assert_eq!(parsed.templates.len(), 1);
        assert_eq!(parsed.templates[0].as_text(), Some("firstsecond"));
    }

    #[test]
    fn test_mismatched_closing_tag() {
        let err = parse("<b>bold</i>", "P", 1, &NoMacros).unwrap_err();
        assert!(err.message.contains("<b>"));
    }
}
