//! Compilation and Linking Tests
//!
//! Directive collection and ordering, terminal handling, scope creation,
//! the one-owner-per-concern checks and text/attribute interpolation as seen
//! through the public compile and link entry points.

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use crate::test_support::{Captured, Harness, Log};
    use crate::{
        CompileArgs, CompileFn, CompilerConfig, DirectiveDefinition, LinkFns, Scope,
        ScopeRequest, Value,
    };

    fn logging_compile(log: &Log, entry: &str) -> Option<CompileFn> {
        let log = log.clone();
        let entry = entry.to_string();
        Some(Rc::new(move |_: &CompileArgs| {
            log.push(entry.clone());
            Ok(LinkFns::default())
        }))
    }

    fn scope_capture(captured: &Captured<Scope>) -> LinkFns {
        let captured = captured.clone();
        LinkFns::post(move |ctx| {
            captured.set(ctx.scope.clone());
            Ok(())
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // MATCHING & ORDERING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_terminal_directive_stops_lower_priorities() {
        let h = Harness::new();
        h.register(
            "firstDirective",
            DirectiveDefinition {
                priority: 1,
                terminal: true,
                compile: logging_compile(&h.log, "first"),
                ..Default::default()
            },
        );
        h.register(
            "secondDirective",
            DirectiveDefinition {
                compile: logging_compile(&h.log, "second"),
                ..Default::default()
            },
        );

        h.compile("<div first-directive second-directive></div>");
        assert_eq!(h.log.entries(), vec!["first"]);
    }

    #[test]
    fn test_terminal_directive_skips_children() {
        let h = Harness::new();
        h.register(
            "stop",
            DirectiveDefinition {
                terminal: true,
                ..Default::default()
            },
        );
        h.register(
            "inner",
            DirectiveDefinition {
                compile: logging_compile(&h.log, "inner"),
                ..Default::default()
            },
        );

        h.compile("<div stop><span inner></span></div>");
        assert!(h.log.entries().is_empty());
    }

    #[test]
    fn test_equal_priorities_compile_by_name() {
        let h = Harness::new();
        for name in ["zeta", "alpha", "mid"] {
            h.register(
                name,
                DirectiveDefinition {
                    compile: logging_compile(&h.log, name),
                    ..Default::default()
                },
            );
        }
        h.register(
            "urgent",
            DirectiveDefinition {
                priority: 10,
                compile: logging_compile(&h.log, "urgent"),
                ..Default::default()
            },
        );

        h.compile("<div zeta mid alpha urgent></div>");
        assert_eq!(h.log.entries(), vec!["urgent", "alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_equal_priorities_order_by_name_across_match_locations() {
        let h = Harness::new();
        let defs = [("zetaEl", "E"), ("alphaCls", "C"), ("midAttr", "A")];
        for (name, restrict) in defs {
            h.register(
                name,
                DirectiveDefinition {
                    restrict: Some(restrict.to_string()),
                    compile: logging_compile(&h.log, name),
                    ..Default::default()
                },
            );
        }

        h.compile("<zeta-el mid-attr class=\"alpha-cls\"></zeta-el>");
        assert_eq!(h.log.entries(), vec!["alphaCls", "midAttr", "zetaEl"]);
    }

    #[test]
    fn test_restrict_locations() {
        let h = Harness::new();
        let defs = [("elemOnly", "E"), ("attrOnly", "A"), ("classOnly", "C"), ("commentOnly", "M")];
        for (name, restrict) in defs {
            h.register(
                name,
                DirectiveDefinition {
                    restrict: Some(restrict.to_string()),
                    compile: logging_compile(&h.log, name),
                    ..Default::default()
                },
            );
        }

        h.compile("<div elem-only></div><attr-only></attr-only>");
        assert!(h.log.entries().is_empty());

        h.compile(
            "<elem-only></elem-only><div attr-only></div>\
             <div class=\"class-only: 1;\"></div><!-- directive: comment-only 2 -->",
        );
        assert_eq!(
            h.log.entries(),
            vec!["elemOnly", "attrOnly", "classOnly", "commentOnly"]
        );
    }

    #[test]
    fn test_class_and_comment_directive_values() {
        let h = Harness::new();
        let seen = Log::default();
        for name in ["fromClass", "fromComment"] {
            let seen = seen.clone();
            h.register(
                name,
                DirectiveDefinition {
                    restrict: Some("CM".to_string()),
                    link: LinkFns::post(move |ctx| {
                        seen.push(ctx.attrs.get(name).to_display_string());
                        Ok(())
                    }),
                    ..Default::default()
                },
            );
        }

        h.compile_and_link(
            "<div><p class=\"a from-class: hello there;\"></p><!-- directive: from-comment 42 --></div>",
        );
        assert_eq!(seen.entries(), vec!["hello there", "42"]);
    }

    #[test]
    fn test_prefixed_attributes_match() {
        let h = Harness::new();
        h.register(
            "myDir",
            DirectiveDefinition {
                compile: logging_compile(&h.log, "hit"),
                ..Default::default()
            },
        );

        h.compile("<div data-my-dir></div><div x-my-dir></div><div my_dir></div>");
        assert_eq!(h.log.entries(), vec!["hit", "hit", "hit"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LINK ORDER
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_pre_links_run_before_children_and_post_links_after() {
        let h = Harness::new();
        for name in ["outer", "inner"] {
            h.register(
                name,
                DirectiveDefinition {
                    link: h.log.link_fns(name),
                    ..Default::default()
                },
            );
        }

        h.compile_and_link("<div outer><p inner></p></div>");
        assert_eq!(
            h.log.entries(),
            vec!["pre outer", "pre inner", "post inner", "post outer"]
        );
    }

    #[test]
    fn test_post_links_run_in_reverse_priority() {
        let h = Harness::new();
        for (name, priority) in [("high", 2), ("low", 1)] {
            h.register(
                name,
                DirectiveDefinition {
                    priority,
                    link: h.log.link_fns(name),
                    ..Default::default()
                },
            );
        }

        h.compile_and_link("<div low high></div>");
        assert_eq!(
            h.log.entries(),
            vec!["pre high", "pre low", "post low", "post high"]
        );
    }

    #[test]
    fn test_link_function_error_is_reported_and_linking_continues() {
        let h = Harness::new();
        h.register(
            "broken",
            DirectiveDefinition {
                link: LinkFns::post(|_| Err(crate::Error::callback("boom"))),
                ..Default::default()
            },
        );
        h.register(
            "fine",
            DirectiveDefinition {
                link: h.log.link_fns("fine"),
                ..Default::default()
            },
        );

        h.compile_and_link("<div><span broken></span><span fine></span></div>");
        assert_eq!(h.errors.codes(), vec!["callback"]);
        assert_eq!(h.errors.contexts(), vec!["<span broken=\"\">"]);
        assert_eq!(h.log.entries(), vec!["pre fine", "post fine"]);
    }

    #[test]
    fn test_compile_error_is_reported() {
        let h = Harness::new();
        h.register(
            "badCompile",
            DirectiveDefinition {
                compile: Some(Rc::new(|_: &CompileArgs| Err(crate::Error::callback("nope")))),
                ..Default::default()
            },
        );

        h.compile("<div bad-compile></div>");
        assert_eq!(h.errors.codes(), vec!["callback"]);
    }

    #[test]
    fn test_second_link_without_clone_is_multilink() {
        let h = Harness::new();
        let (_, link) = h.compile("<div>plain</div>");
        link.link_to(&h.scope()).unwrap();

        let err = link.link_to(&h.scope()).unwrap_err();
        assert_eq!(err.code(), "multilink");
    }

    #[test]
    fn test_clone_linking_can_repeat() {
        let h = Harness::new();
        let (nodes, link) = h.compile("<p>{{greeting}}</p>");
        let scope = h.scope();
        scope.set("greeting", Value::from("hi"));

        let first = link.link_clone(&scope, |_, _| {}).unwrap();
        let second = link.link_clone(&scope, |_, _| {}).unwrap();
        h.digest();

        assert_eq!(first.text(), "hi");
        assert_eq!(second.text(), "hi");
        assert_eq!(nodes.text(), "{{greeting}}");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SCOPES
    // ═══════════════════════════════════════════════════════════════════════════════

    fn isolate() -> ScopeRequest {
        ScopeRequest::Isolate(Default::default())
    }

    #[test]
    fn test_two_isolate_scopes_on_one_element_is_multidir() {
        let h = Harness::new();
        for name in ["isoOne", "isoTwo"] {
            h.register(
                name,
                DirectiveDefinition {
                    scope: isolate(),
                    ..Default::default()
                },
            );
        }

        let err = h.compiler.compile_html("<div iso-one iso-two></div>").err().unwrap();
        assert_eq!(err.code(), "multidir");
        assert!(err.to_string().contains("new/isolated scope"));
    }

    #[test]
    fn test_isolate_and_child_scope_on_one_element_is_multidir() {
        // Either processing order conflicts.
        for child_priority in [0, 5] {
            let h = Harness::new();
            h.register(
                "aIsolate",
                DirectiveDefinition {
                    scope: isolate(),
                    ..Default::default()
                },
            );
            h.register(
                "bChild",
                DirectiveDefinition {
                    priority: child_priority,
                    scope: ScopeRequest::New,
                    ..Default::default()
                },
            );

            let err = h.compiler.compile_html("<div a-isolate b-child></div>").err().unwrap();
            assert_eq!(err.code(), "multidir");
        }
    }

    #[test]
    fn test_child_scope_directives_share_one_scope() {
        let h = Harness::new();
        let first = Captured::new();
        let second = Captured::new();
        for (name, captured) in [("one", &first), ("two", &second)] {
            h.register(
                name,
                DirectiveDefinition {
                    scope: ScopeRequest::New,
                    link: scope_capture(captured),
                    ..Default::default()
                },
            );
        }

        let nodes = h.compile_and_link("<div><span one two></span><b></b></div>");
        let scope = first.get();
        assert!(scope.ptr_eq(&second.get()));
        assert!(!scope.ptr_eq(&h.scope()));
        assert!(scope.parent().unwrap().ptr_eq(&h.scope()));

        let children = nodes.first().unwrap().children();
        assert!(children[0].has_class("ng-scope"));
        assert!(!children[1].has_class("ng-scope"));
    }

    #[test]
    fn test_isolate_scope_does_not_inherit() {
        let h = Harness::new();
        let captured = Captured::new();
        h.register(
            "lonely",
            DirectiveDefinition {
                scope: isolate(),
                link: scope_capture(&captured),
                ..Default::default()
            },
        );
        h.scope().set("shared", Value::from("visible"));

        let nodes = h.compile_and_link("<div><p lonely></p></div>");
        let isolate_scope = captured.get();
        assert!(isolate_scope.is_isolate());
        assert_eq!(isolate_scope.get("shared"), Value::Undefined);

        let element = nodes.first().unwrap().children()[0].clone();
        assert!(element.has_class("ng-isolate-scope"));
        assert!(element.data("$isolateScopeNoTemplate").is_some());
    }

    #[test]
    fn test_compile_roots_get_scope_class_and_data() {
        let h = Harness::new();
        let nodes = h.compile_and_link("<div></div><p></p>");
        for node in nodes.to_vec() {
            assert!(node.has_class("ng-scope"));
            assert!(node.data("$scope").is_some());
        }
    }

    #[test]
    fn test_debug_info_disabled_skips_classes() {
        let h = Harness::with_config(CompilerConfig {
            debug_info_enabled: false,
            ..Default::default()
        });
        let nodes = h.compile_and_link("<div>{{1 + 1}}</div>");
        let root = nodes.first().unwrap();
        assert!(!root.has_class("ng-scope"));
        assert!(!root.has_class("ng-binding"));
        assert_eq!(root.text_content(), "2");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // INTERPOLATION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_text_interpolation_inside_select_option() {
        let h = Harness::new();
        let nodes =
            h.compile_and_link("<select ng-model=\"x\"><option value=\"\">Greet {{name}}!</option></select>");

        h.scope().set("name", Value::from("Misko"));
        h.digest();
        assert_eq!(nodes.text(), "Greet Misko!");
    }

    #[test]
    fn test_text_interpolation_marks_binding() {
        let h = Harness::new();
        let nodes = h.compile_and_link("<div>Hello {{name}}</div>");
        h.scope().set("name", Value::from("World"));
        h.digest();

        let root = nodes.first().unwrap();
        assert_eq!(root.text_content(), "Hello World");
        assert!(root.has_class("ng-binding"));
    }

    #[test]
    fn test_interpolated_array_renders_as_json() {
        let h = Harness::new();
        h.scope()
            .set("items", Value::array(vec![Value::from(1), Value::from(2)]));

        let nodes = h.compile_and_link("<p>{{items}}</p>");
        assert_eq!(nodes.text(), "[1,2]");
    }

    #[test]
    fn test_attribute_interpolation_updates_attribute() {
        let h = Harness::new();
        let nodes = h.compile_and_link("<a title=\"item {{id}}\"></a>");
        h.scope().set("id", Value::from(7));
        h.digest();

        assert_eq!(nodes.first().unwrap().attr("title").as_deref(), Some("item 7"));
    }

    #[test]
    fn test_observer_sees_interpolated_value() {
        let h = Harness::new();
        let seen = Log::default();
        let observed = seen.clone();
        h.register(
            "watcher",
            DirectiveDefinition {
                link: LinkFns::post(move |ctx| {
                    let observed = observed.clone();
                    ctx.attrs.observe("label", move |value| {
                        observed.push(value.to_display_string());
                        Ok(())
                    });
                    Ok(())
                }),
                ..Default::default()
            },
        );

        h.scope().set("who", Value::from("you"));
        h.compile_and_link("<div watcher label=\"hi {{who}}\"></div>");
        assert_eq!(seen.entries(), vec!["hi you"]);

        h.scope().set("who", Value::from("me"));
        h.digest();
        assert_eq!(seen.entries(), vec!["hi you", "hi me"]);
    }

    #[test]
    fn test_event_handler_interpolation_is_rejected() {
        let h = Harness::new();
        let err = h
            .compiler
            .compile_html("<button onclick=\"{{action}}\"></button>")
            .err()
            .unwrap();
        assert_eq!(err.code(), "nodomevents");

        assert!(h.compiler.compile_html("<button ng-attr-onclick=\"{{action}}\"></button>").is_ok());
    }

    #[test]
    fn test_custom_interpolation_symbols() {
        let h = Harness::with_config(CompilerConfig {
            start_symbol: "[[".to_string(),
            end_symbol: "]]".to_string(),
            ..Default::default()
        });
        h.register(
            "greeting",
            DirectiveDefinition {
                template: Some(crate::TemplateSource::markup("<b>{{who}}</b>")),
                ..Default::default()
            },
        );
        h.scope().set("who", Value::from("there"));

        let nodes = h.compile_and_link("<div>[[who]] {{who}}</div><p greeting></p>");
        assert_eq!(nodes.text(), "there {{who}}there");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ROOT TEXT WRAPPING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_top_level_text_is_wrapped_in_span() {
        let h = Harness::new();
        let (nodes, link) = h.compile("hello {{name}}<div></div>");
        let first = nodes.first().unwrap();
        assert_eq!(first.tag_name(), "span");
        assert_eq!(nodes.len(), 2);

        let scope = h.scope();
        scope.set("name", Value::from("Misko"));
        link.link_to(&scope).unwrap();
        h.digest();
        assert_eq!(nodes.text(), "hello Misko");
    }
}
