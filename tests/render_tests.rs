//! Integration tests for passage rendering, macros and callbacks

use pretty_assertions::assert_eq;
use serde_json::json;
use weft::core::render::Passage;
use weft::{Engine, MemoryHost, MemoryPassages, RenderConfig, RenderErrorKind};

fn engine(passages: &[(&str, &str)]) -> Engine<MemoryHost> {
    Engine::in_memory(passages.iter().copied().collect())
}

fn engine_with(passages: &[(&str, &str)], config: RenderConfig) -> Engine<MemoryHost> {
    let passages: MemoryPassages = passages.iter().copied().collect();
    Engine::with_config(MemoryHost::new(), passages, config)
}

fn render(source: &str) -> Engine<MemoryHost> {
    let mut engine = engine(&[("Start", source)]);
    engine.show("Start");
    engine
}

// ============================================================================
// Newline modes
// ============================================================================

mod newlines {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_blank_line_splits_paragraphs() {
        assert_eq!(render("Hello\n\nWorld!").html(), "<p>Hello</p><p>World!</p>");
    }

    #[test]
    fn test_single_newline_stays_in_paragraph() {
        assert_eq!(render("Hello\nWorld!").html(), "<p>Hello\nWorld!</p>");
    }

    #[test]
    fn test_block_tags_are_not_wrapped() {
        let engine = render("Intro\n\n<div>inside\n\nstill inside</div>");
        assert_eq!(
            engine.html(),
            "<p>Intro</p><div>inside<br><br>still inside</div>"
        );
    }

    #[test]
    fn test_inline_elements_join_the_paragraph() {
        assert_eq!(render("a <b>bold</b> move").html(), "<p>a <b>bold</b> move</p>");
    }

    #[test]
    fn test_trailing_backslash_joins_lines() {
        assert_eq!(render("Hello\\").html(), "<p>Hello</p>");
        assert_eq!(render("one \\\ntwo").html(), "<p>one two</p>");
    }

    #[test]
    fn test_passage_tags_select_mode() {
        let mut passages = MemoryPassages::new();
        passages.insert(Passage::new("Raw", "a\n\nb").with_tags(["nobr"]));
        passages.insert(Passage::new("Lines", "a\nb").with_tags(["breaks"]));
        let mut engine = Engine::in_memory(passages);

        engine.show("Raw");
        assert_eq!(engine.html(), "a\n\nb");
        engine.show("Lines");
        assert_eq!(engine.html(), "a<br>b");
    }
}

// ============================================================================
// Expressions
// ============================================================================

mod expressions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_story_variables_print() {
        let mut engine = engine(&[("Start", "You have $gold coins.")]);
        engine.load_story(r#"{"gold": 12}"#).unwrap();
        engine.show("Start");
        assert_eq!(engine.html(), "<p>You have 12 coins.</p>");
    }

    #[test]
    fn test_missing_variable_warns_with_suggestion() {
        let mut engine = engine(&[("Start", "$glod")]);
        engine.load_story(r#"{"gold": 1}"#).unwrap();
        engine.show("Start");
        assert_eq!(engine.html(), "");
        assert!(engine.errors().is_empty());
        assert!(engine
            .warnings()
            .iter()
            .any(|w| w.message.contains("did you mean $gold")));
    }

    #[test]
    fn test_strict_variables_make_missing_an_error() {
        let mut engine = engine_with(&[("Start", "@print($missing)")], RenderConfig::strict());
        engine.show("Start");
        assert_eq!(engine.errors().len(), 1);
        assert!(matches!(
            engine.errors()[0].kind,
            RenderErrorKind::Expression { .. }
        ));
    }

    #[test]
    fn test_unnamed_macro_prints_last_value() {
        let engine = render("@(_a = 2, _a * 21)");
        assert_eq!(engine.html(), "42");
    }

    #[test]
    fn test_assignment_prints_nothing() {
        let mut engine = engine(&[("Start", "@($seen = true)")]);
        engine.show("Start");
        assert_eq!(engine.html(), "");
        assert_eq!(engine.snapshot_story()["seen"], json!(true));
    }

    #[test]
    fn test_expression_error_quotes_source_as_written() {
        let mut engine = engine(&[("Start", "@print($box.lid.color)")]);
        engine.load_story(r#"{"box": {}}"#).unwrap();
        engine.show("Start");
        assert_eq!(engine.errors().len(), 1);
        let RenderErrorKind::Expression { source, .. } = &engine.errors()[0].kind else {
            panic!("expected expression error, got {:?}", engine.errors()[0]);
        };
        assert_eq!(source, "$box.lid.color");
        assert!(engine.errors()[0].message().contains("`$box.lid.color`"));
    }

    #[test]
    fn test_deeply_nested_expression_is_a_displayed_error() {
        let source = format!("before @print({}1{}) after", "(".repeat(3000), ")".repeat(3000));
        let engine = render(&source);
        assert_eq!(engine.errors().len(), 1);
        let RenderErrorKind::Expression { cause, .. } = &engine.errors()[0].kind else {
            panic!("expected expression error, got {:?}", engine.errors()[0]);
        };
        assert!(cause.contains("nesting too deep"), "{}", cause);
        assert!(engine.html().contains("after"));
    }

    #[test]
    fn test_deeply_nested_markup_is_a_parse_error() {
        let engine = render(&format!("{}x{}", "<b>".repeat(3000), "</b>".repeat(3000)));
        assert_eq!(engine.errors().len(), 1);
        assert!(matches!(engine.errors()[0].kind, RenderErrorKind::Parse(_)));
    }

    #[test]
    fn test_body_on_bodiless_macro_is_an_error() {
        let engine = render("@print(1){x}");
        assert_eq!(engine.errors().len(), 1);
        let RenderErrorKind::Authoring(message) = &engine.errors()[0].kind else {
            panic!("expected authoring error, got {:?}", engine.errors()[0]);
        };
        assert!(message.contains("does not take a body"));
    }

    #[test]
    fn test_value_with_body_is_an_error() {
        let mut engine = engine(&[("Start", "$gold{body}")]);
        engine.load_story(r#"{"gold": 1}"#).unwrap();
        engine.show("Start");
        assert_eq!(engine.errors().len(), 1);
        assert!(matches!(engine.errors()[0].kind, RenderErrorKind::Authoring(_)));
    }
}

// ============================================================================
// Elements and links
// ============================================================================

mod elements {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failed_attribute_skips_the_rest() {
        let engine = render("<div a=(1) b=(nosuchfn()) c=(2)>t</div>");
        let div = engine.host().elements("div")[0];
        assert_eq!(engine.host().attribute(div, "a"), Some("1"));
        assert_eq!(engine.host().attribute(div, "b"), None);
        assert_eq!(engine.host().attribute(div, "c"), None);
        assert_eq!(engine.host().text_content(div), "t");

        assert_eq!(engine.errors().len(), 1);
        let RenderErrorKind::Attribute { name, element, .. } = &engine.errors()[0].kind else {
            panic!("expected attribute error, got {:?}", engine.errors()[0]);
        };
        assert_eq!(name, "b");
        assert_eq!(element, "div");
    }

    #[test]
    fn test_boolean_attributes() {
        let engine = render("<input disabled=(true) hidden=(false)>");
        let input = engine.host().elements("input")[0];
        assert_eq!(engine.host().attribute(input, "disabled"), Some(""));
        assert_eq!(engine.host().attribute(input, "hidden"), None);
    }

    #[test]
    fn test_event_handler_attribute() {
        let mut engine = engine(&[("Start", "<button onclick=(e => $log.push(e.type))>Go</button>")]);
        engine.load_story(r#"{"log": []}"#).unwrap();
        engine.show("Start");
        let button = engine.host().elements("button")[0];
        assert!(engine.click(button));
        assert_eq!(engine.snapshot_story()["log"], json!(["click"]));
    }

    #[test]
    fn test_link_forms() {
        let engine = render("[[banana]] [[daisy->eagle]] [[fallacy<-glob]] [[holiday|iguana]]");
        let links: Vec<(String, String)> = engine
            .host()
            .elements("a")
            .into_iter()
            .map(|a| {
                (
                    engine.host().text_content(a),
                    engine.host().attribute(a, "data-passage").unwrap_or("").to_string(),
                )
            })
            .collect();
        assert_eq!(
            links,
            vec![
                ("banana".to_string(), "banana".to_string()),
                ("daisy".to_string(), "eagle".to_string()),
                ("glob".to_string(), "fallacy".to_string()),
                ("holiday".to_string(), "iguana".to_string()),
            ]
        );
    }

    #[test]
    fn test_link_navigates() {
        let mut engine = engine(&[("Start", "[[Go->Next]]"), ("Next", "Arrived")]);
        engine.show("Start");
        let a = engine.host().elements("a")[0];
        assert_eq!(engine.host().attribute(a, "class"), Some("link"));
        assert!(engine.click(a));
        assert_eq!(engine.current_passage(), Some("Next"));
        assert_eq!(engine.html(), "<p>Arrived</p>");
    }

    #[test]
    fn test_missing_passage_link_is_broken() {
        let engine = render("[[Nowhere]]");
        let a = engine.host().elements("a")[0];
        assert_eq!(engine.host().attribute(a, "class"), Some("link broken"));
    }
}

// ============================================================================
// Control flow
// ============================================================================

mod control_flow {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_if_chain() {
        let source = "@if($n > 5) {big} @elseif($n > 2) {mid} @else {small}";
        for (n, expected) in [(9, "<p>big</p>"), (3, "<p>mid</p>"), (1, "<p>small</p>")] {
            let mut engine = engine(&[("Start", source)]);
            engine.load_story(&format!(r#"{{"n": {}}}"#, n)).unwrap();
            engine.show("Start");
            assert_eq!(engine.html(), expected);
        }
    }

    #[test]
    fn test_switch_chain() {
        let source = "@switch($n) @case(1) {one} @case(2, 3) {two or three} @default {many}";
        for (n, expected) in [(1, "<p>one</p>"), (3, "<p>two or three</p>"), (7, "<p>many</p>")] {
            let mut engine = engine(&[("Start", source)]);
            engine.load_story(&format!(r#"{{"n": {}}}"#, n)).unwrap();
            engine.show("Start");
            assert_eq!(engine.html(), expected);
        }
    }

    #[test]
    fn test_switch_uses_strict_equality() {
        let mut engine = engine(&[("Start", "@switch($n) @case(\"1\") {string} @default {other}")]);
        engine.load_story(r#"{"n": 1}"#).unwrap();
        engine.show("Start");
        assert_eq!(engine.html(), "<p>other</p>");
    }

    #[test]
    fn test_orphan_else_is_an_error() {
        let engine = render("@else {x}");
        assert_eq!(engine.errors().len(), 1);
        assert!(engine.errors()[0].message().contains("must follow @if"));
    }

    #[test]
    fn test_for_over_array_and_object() {
        assert_eq!(render("@for(_x of [1, 2, 3]) {_x}").html(), "123");

        let mut engine = engine(&[("Start", "@for(_e of $bag) {_e[0]=_e[1];}")]);
        engine.load_story(r#"{"bag": {"a": 1, "b": 2}}"#).unwrap();
        engine.show("Start");
        // Each iteration renders its own run of inline content.
        assert_eq!(engine.html(), "<p>a=1;</p><p>b=2;</p>");
    }

    #[test]
    fn test_break_and_continue() {
        let engine = render("@for(_i of [1, 2, 3, 4]) {@if(_i == 2) {@continue}@if(_i == 4) {@break}_i}");
        assert_eq!(engine.html(), "13");
        assert!(engine.errors().is_empty());
    }

    #[test]
    fn test_stray_break_is_one_error() {
        let engine = render("before @break after");
        assert_eq!(engine.errors().len(), 1);
        assert_eq!(
            engine.errors()[0].kind,
            RenderErrorKind::StrayLoopSignal("break")
        );
        assert!(engine.html().contains("after"));
    }

    #[test]
    fn test_stray_continue_is_one_error() {
        let engine = render("before @continue after");
        assert_eq!(engine.errors().len(), 1);
        assert_eq!(
            engine.errors()[0].kind,
            RenderErrorKind::StrayLoopSignal("continue")
        );
        assert!(engine.html().contains("after"));
    }

    #[test]
    fn test_break_in_deferred_body_is_stray_when_it_runs() {
        let mut engine = engine(&[("Start", "@for(_i of [1, 2]) {@later(5) {@break}}")]);
        engine.show("Start");
        assert!(engine.errors().is_empty());
        assert_eq!(engine.host().elements("span").len(), 2);

        engine.advance(5);
        assert_eq!(engine.errors().len(), 2);
        for err in engine.errors() {
            assert_eq!(err.kind, RenderErrorKind::StrayLoopSignal("break"));
            assert_eq!(err.line, 1);
        }
    }

    #[test]
    fn test_while_runs_until_false() {
        let mut engine = engine(&[("Start", "@while($n < 3) {@set($n = $n + 1)$n}")]);
        engine.load_story(r#"{"n": 0}"#).unwrap();
        engine.show("Start");
        assert_eq!(engine.html(), "123");
    }

    #[test]
    fn test_too_many_iterations_is_fatal() {
        let config = RenderConfig {
            max_loop_iterations: 5,
            ..RenderConfig::default()
        };
        let mut engine = engine_with(&[("Start", "before @while(true) {x} after")], config);
        engine.show("Start");

        assert_eq!(engine.errors().len(), 1);
        assert_eq!(
            engine.errors()[0].kind,
            RenderErrorKind::TooManyIterations {
                name: "while".into(),
                limit: 5
            }
        );
        let html = engine.html();
        assert!(html.contains("xxxxx"));
        assert!(!html.contains("after"));
    }

    #[test]
    fn test_for_over_limit_is_fatal() {
        let config = RenderConfig {
            max_loop_iterations: 2,
            ..RenderConfig::default()
        };
        let mut engine = engine_with(&[("Start", "@for(_i of [1, 2, 3]) {_i}")], config);
        engine.show("Start");
        assert_eq!(engine.errors().len(), 1);
        assert!(engine.errors()[0].is_fatal());
    }
}

// ============================================================================
// Passages, recursion and parse failures
// ============================================================================

mod passages {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_include_renders_in_place() {
        let mut engine = engine(&[("Start", "A @include(\"Part\") C"), ("Part", "B")]);
        engine.show("Start");
        assert_eq!(engine.html(), "<p>A B C</p>");
    }

    #[test]
    fn test_render_macro_parses_strings() {
        let engine = render("@render(\"<b>\" + 'hi' + \"</b>\")");
        assert_eq!(engine.html(), "<p><b>hi</b></p>");
    }

    #[test]
    fn test_infinite_include_reports_once() {
        let config = RenderConfig {
            recursion_limit: 20,
            ..RenderConfig::default()
        };
        let mut engine = engine_with(&[("Loop", "@include(\"Loop\")")], config);
        engine.show("Loop");

        let recursion = engine
            .errors()
            .iter()
            .filter(|e| e.kind == RenderErrorKind::Recursion)
            .count();
        assert_eq!(recursion, 1);
        assert_eq!(engine.runtime().depth, 0);
        assert!(!engine.runtime().recovering);
    }

    #[test]
    fn test_parse_failure_renders_one_error() {
        let engine = render("line one\n@if(true) {never closed");
        assert_eq!(engine.errors().len(), 1);
        let err = &engine.errors()[0];
        assert!(matches!(err.kind, RenderErrorKind::Parse(_)));
        assert_eq!(err.line, 2);
        assert_eq!(engine.host().elements("span").len(), 1);
    }

    #[test]
    fn test_missing_passage_suggests_name() {
        let mut engine = engine(&[("Start", "x"), ("Forest", "y")]);
        engine.show("Forrest");
        assert_eq!(engine.errors().len(), 1);
        assert!(engine.errors()[0].message().contains("did you mean 'Forest'"));
    }
}

// ============================================================================
// Deferred callbacks and captures
// ============================================================================

mod deferred {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_later_sees_its_own_iteration() {
        let mut engine = engine(&[("Start", "@for(_i of [1, 2, 3]) {@later(10) {_i}}")]);
        engine.show("Start");
        assert_eq!(
            engine.html(),
            r#"<span class="later"></span><span class="later"></span><span class="later"></span>"#
        );

        engine.advance(10);
        assert_eq!(
            engine.html(),
            r#"<span class="later">1</span><span class="later">2</span><span class="later">3</span>"#
        );
    }

    #[test]
    fn test_later_callbacks_capture_loop_values() {
        let mut engine = engine(&[(
            "Start",
            "@for(_i of [1, 2, 3]) {@later(10) {@($log.push(_i), undefined)}}",
        )]);
        engine.load_story(r#"{"log": []}"#).unwrap();
        engine.show("Start");
        assert_eq!(engine.snapshot_story()["log"], json!([]));

        engine.advance(5);
        assert_eq!(engine.snapshot_story()["log"], json!([]));
        engine.advance(5);
        assert_eq!(engine.snapshot_story()["log"], json!([1, 2, 3]));
        assert_eq!(engine.host().pending_timers(), 0);
    }

    #[test]
    fn test_detached_callback_is_a_no_op() {
        let mut engine = engine(&[("Start", "@later(10) {@($hit = true)}"), ("Next", "elsewhere")]);
        engine.show("Start");
        engine.show("Next");
        engine.advance(10);
        assert!(engine.errors().is_empty());
        assert_eq!(engine.snapshot_story().get("hit"), None);
        assert_eq!(engine.html(), "<p>elsewhere</p>");
    }

    #[test]
    fn test_navigation_drops_detached_callbacks() {
        let mut engine = engine(&[(
            "Start",
            "[[Start]] <span onclick=(e => 1)>x</span> @redoable(\"r\") {y}",
        )]);
        engine.show("Start");
        let registered = engine.runtime().callbacks.len();
        assert_eq!(registered, 3);

        for _ in 0..50 {
            engine.show("Start");
            assert_eq!(engine.runtime().callbacks.len(), registered);
        }
        assert_eq!(engine.runtime().redoables["r"].len(), 1);

        engine.trigger("r");
        assert!(engine.errors().is_empty());
        assert!(engine.html().contains(r#"<span class="redoable" data-name="r">y</span>"#));
    }

    #[test]
    fn test_redoable_rerenders_on_trigger() {
        let mut engine = engine(&[("Start", "@redoable(\"score\") {Score: $score}")]);
        engine.load_story(r#"{"score": 1}"#).unwrap();
        engine.show("Start");
        assert_eq!(
            engine.html(),
            r#"<span class="redoable" data-name="score">Score: 1</span>"#
        );

        engine.load_story(r#"{"score": 2}"#).unwrap();
        engine.trigger("score");
        assert_eq!(
            engine.html(),
            r#"<span class="redoable" data-name="score">Score: 2</span>"#
        );
    }

    #[test]
    fn test_link_macro_replaces_itself() {
        let mut engine = engine(&[("Start", "@link(\"open\") {@($opened = true)inside}")]);
        engine.show("Start");
        let a = engine.host().elements("a")[0];
        assert!(engine.click(a));
        assert_eq!(engine.html(), "<span>inside</span>");
        assert_eq!(engine.snapshot_story()["opened"], json!(true));
        assert!(engine.host().elements("a").is_empty());
    }

    #[test]
    fn test_link_macro_with_passage_runs_body_then_navigates() {
        let mut engine = engine(&[
            ("Start", "@link(\"go\", \"Next\") {@($went = true)}"),
            ("Next", "Now @print($went)"),
        ]);
        engine.show("Start");
        let a = engine.host().elements("a")[0];
        assert!(engine.click(a));
        assert_eq!(engine.html(), "<p>Now true</p>");
    }
}

// ============================================================================
// Bindings and punting
// ============================================================================

mod bindings {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_checkbox_binds_story_variable() {
        let mut engine = engine(&[("Start", "@checkbox($agree, \"Agree\")")]);
        engine.load_story(r#"{"agree": false}"#).unwrap();
        engine.show("Start");

        let input = engine.host().elements("input")[0];
        assert_eq!(engine.host().attribute(input, "type"), Some("checkbox"));
        assert_eq!(engine.host().attribute(input, "checked"), None);
        assert!(engine.set_checked(input, true));
        assert_eq!(engine.snapshot_story()["agree"], json!(true));
    }

    #[test]
    fn test_textinput_binds_story_variable() {
        let mut engine = engine(&[("Start", "@textinput($name, \"Your name\")")]);
        engine.load_story(r#"{"name": ""}"#).unwrap();
        engine.show("Start");

        let input = engine.host().elements("input")[0];
        assert_eq!(engine.host().attribute(input, "placeholder"), Some("Your name"));
        assert!(engine.input_text(input, "Ann"));
        assert_eq!(engine.snapshot_story()["name"], json!("Ann"));
    }

    #[test]
    fn test_punt_carries_temp_bindings() {
        let mut engine = engine(&[
            ("Start", "@set(_keep = 5, _drop = 6)@punt(_keep)[[Next]]"),
            ("Next", "@print(_keep)-@print(_drop)"),
        ]);
        engine.show("Start");
        let a = engine.host().elements("a")[0];
        assert!(engine.click(a));
        assert_eq!(engine.html(), "<p>5-</p>");
    }

    #[test]
    fn test_set_rejects_non_assignments() {
        let engine = render("@set(1 + 1)");
        assert_eq!(engine.errors().len(), 1);
        assert!(matches!(engine.errors()[0].kind, RenderErrorKind::Macro { .. }));
    }
}

// ============================================================================
// Placing content into other nodes
// ============================================================================

mod placement {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render_raw(source: &str) -> Engine<MemoryHost> {
        let mut passages = MemoryPassages::new();
        passages.insert(Passage::new("Start", source).with_tags(["nobr"]));
        let mut engine = Engine::in_memory(passages);
        engine.show("Start");
        engine
    }

    #[test]
    fn test_append_and_prepend() {
        let engine = render_raw("<div id=\"box\">mid</div>@append(\"#box\") {end}@prepend(\"#box\") {start}");
        assert!(engine.errors().is_empty());
        assert_eq!(
            engine.html(),
            r#"<div id="box"><span>start</span>mid<span>end</span></div>"#
        );
    }

    #[test]
    fn test_replace_clears_every_match() {
        let engine = render_raw(
            "<ul class=\"slot\"><li>old</li></ul><ol class=\"slot\">old</ol>@replace(\".slot\") {new}",
        );
        assert!(engine.errors().is_empty());
        assert_eq!(
            engine.html(),
            r#"<ul class="slot"><span>new</span></ul><ol class="slot"><span>new</span></ol>"#
        );
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let engine = render_raw("@append(\"#nowhere\") {x}");
        assert_eq!(engine.errors().len(), 1);
        assert!(engine.errors()[0].message().contains("nothing matches '#nowhere'"));
    }
}
