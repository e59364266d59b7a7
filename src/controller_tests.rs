//! Controller Tests
//!
//! Instantiation order, `require` resolution, replacement instances,
//! bindings on controllers and the lifecycle hooks.

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use crate::test_support::{Captured, Harness, Log};
    use crate::{
        BindToController, Compiler, ControllerRegistry, ControllerSpec, DirectiveDefinition,
        Error, Injectable, LinkFns, Require, Scope, ScopeRequest, TemplateSource, Value,
    };

    /// Controller whose constructor and hooks write to `log`.
    fn logging_controller(log: &Log, name: &'static str) -> Option<ControllerSpec> {
        let log = log.clone();
        Some(ControllerSpec::factory(move |_, this| {
            log.push(format!("construct {}", name));
            this.set("name", Value::from(name));
            for hook in ["$onInit", "$postLink", "$onDestroy"] {
                let log = log.clone();
                this.set(
                    hook,
                    Value::function(move |_, _| {
                        log.push(format!("{} {}", hook, name));
                        Ok(Value::Undefined)
                    }),
                );
            }
            Ok(Value::Undefined)
        }))
    }

    fn requiring(require: Require, captured: &Captured<Value>) -> DirectiveDefinition {
        let captured = captured.clone();
        DirectiveDefinition {
            require,
            link: LinkFns::post(move |ctx| {
                captured.set(ctx.controllers.clone());
                Ok(())
            }),
            ..Default::default()
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // INSTANTIATION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_all_controllers_constructed_before_on_init() {
        let h = Harness::new();
        for name in ["alpha", "beta"] {
            h.register(
                name,
                DirectiveDefinition {
                    controller: logging_controller(&h.log, name),
                    ..Default::default()
                },
            );
        }

        h.compile_and_link("<div beta alpha></div>");
        assert_eq!(
            h.log.entries(),
            vec![
                "construct alpha",
                "construct beta",
                "$onInit alpha",
                "$onInit beta",
                "$postLink alpha",
                "$postLink beta",
            ]
        );
    }

    #[test]
    fn test_post_link_hook_runs_after_children() {
        let h = Harness::new();
        h.register(
            "outer",
            DirectiveDefinition {
                controller: logging_controller(&h.log, "outer"),
                ..Default::default()
            },
        );
        h.register(
            "inner",
            DirectiveDefinition {
                link: h.log.link_fns("inner"),
                ..Default::default()
            },
        );

        h.compile_and_link("<div outer><p inner></p></div>");
        assert_eq!(
            h.log.entries(),
            vec![
                "construct outer",
                "$onInit outer",
                "pre inner",
                "post inner",
                "$postLink outer",
            ]
        );
    }

    #[test]
    fn test_controller_published_on_element() {
        let h = Harness::new();
        h.register(
            "holder",
            DirectiveDefinition {
                controller: logging_controller(&h.log, "holder"),
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<section holder></section>");
        let controller = nodes.first().unwrap().data("$holderController").unwrap();
        assert_eq!(controller.get("name"), Value::from("holder"));
    }

    #[test]
    fn test_replacement_instance_is_used() {
        let h = Harness::new();
        h.register(
            "swap",
            DirectiveDefinition {
                controller: Some(ControllerSpec::factory(|_, _| {
                    Ok(Value::object_from([("kind", Value::from("replacement"))]))
                })),
                controller_as: Some("swapped".to_string()),
                ..Default::default()
            },
        );
        let captured = Captured::new();
        h.register("needsSwap", requiring(Require::One("^swap".to_string()), &captured));

        let nodes = h.compile_and_link("<div swap><span needs-swap></span></div>");
        assert_eq!(captured.get().get("kind"), Value::from("replacement"));
        assert_eq!(h.scope().get("swapped").get("kind"), Value::from("replacement"));
        assert_eq!(
            nodes.first().unwrap().data("$swapController").unwrap().get("kind"),
            Value::from("replacement")
        );
    }

    #[test]
    fn test_constructor_error_is_reported() {
        let h = Harness::new();
        h.register(
            "fragile",
            DirectiveDefinition {
                controller: Some(ControllerSpec::factory(|_, _| Err(Error::callback("ctor failed")))),
                link: h.log.link_fns("fragile"),
                ..Default::default()
            },
        );

        h.compile_and_link("<div fragile></div>");
        assert_eq!(h.errors.codes(), vec!["callback"]);
        assert_eq!(h.log.entries(), vec!["pre fragile", "post fragile"]);
    }

    #[test]
    fn test_named_controller_with_alias() {
        let controllers = ControllerRegistry::new();
        controllers.register(
            "GreeterCtrl",
            Injectable::new(["$scope"], |this, args| {
                let scope = args[0].downcast_host::<Scope>();
                this.set("greeting", Value::from("hi"));
                this.set("hasScope", Value::from(scope.is_some()));
                Ok(Value::Undefined)
            }),
        );
        let h = Harness::with(Compiler::builder().controllers(controllers));
        h.register(
            "greeter",
            DirectiveDefinition {
                controller: Some(ControllerSpec::named("GreeterCtrl as greeter")),
                template: Some(TemplateSource::markup("<b>{{greeter.greeting}}</b>")),
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<div greeter></div>");
        assert_eq!(nodes.text(), "hi");
        assert_eq!(h.scope().get("greeter").get("hasScope"), Value::Bool(true));
    }

    #[test]
    fn test_unknown_named_controller_fails_link() {
        let h = Harness::new();
        h.register(
            "ghost",
            DirectiveDefinition {
                controller: Some(ControllerSpec::named("MissingCtrl")),
                ..Default::default()
            },
        );

        let (_, link) = h.compile("<div ghost></div>");
        let err = link.link_to(&h.scope()).unwrap_err();
        assert_eq!(err.code(), "ctrlreg");
    }

    #[test]
    fn test_controller_name_from_attribute() {
        let controllers = ControllerRegistry::new();
        controllers.register(
            "PageCtrl",
            Injectable::new(Vec::<String>::new(), |this, _| {
                this.set("title", Value::from("Home"));
                Ok(Value::Undefined)
            }),
        );
        let h = Harness::with(Compiler::builder().controllers(controllers));
        h.register(
            "ngController",
            DirectiveDefinition {
                scope: ScopeRequest::New,
                controller: Some(ControllerSpec::FromAttribute),
                priority: 500,
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<div ng-controller=\"PageCtrl as page\">{{page.title}}</div>");
        assert_eq!(nodes.text(), "Home");
        assert!(h.scope().get("page").is_undefined());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // REQUIRE
    // ═══════════════════════════════════════════════════════════════════════════════

    fn parent_directive(h: &Harness) {
        h.register(
            "parent",
            DirectiveDefinition {
                controller: logging_controller(&h.log, "parent"),
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_require_from_ancestor() {
        let h = Harness::new();
        parent_directive(&h);
        let captured = Captured::new();
        h.register("child", requiring(Require::One("^parent".to_string()), &captured));

        h.compile_and_link("<div parent><p><span child></span></p></div>");
        assert_eq!(captured.get().get("name"), Value::from("parent"));
    }

    #[test]
    fn test_require_caret_searches_own_element_first() {
        let h = Harness::new();
        parent_directive(&h);
        let own = Captured::new();
        let strict = Captured::new();
        h.register("own", requiring(Require::One("^parent".to_string()), &own));
        h.register("strict", requiring(Require::One("?^^parent".to_string()), &strict));

        h.compile_and_link("<div parent own strict></div>");
        assert_eq!(own.get().get("name"), Value::from("parent"));
        assert_eq!(strict.get(), Value::Null);
    }

    #[test]
    fn test_require_array_and_map() {
        let h = Harness::new();
        parent_directive(&h);
        let as_array = Captured::new();
        let as_map = Captured::new();
        h.register(
            "list",
            requiring(
                Require::Many(vec!["^parent".to_string(), "?missing".to_string()]),
                &as_array,
            ),
        );
        let mut map = IndexMap::new();
        map.insert("parent".to_string(), "^".to_string());
        h.register("named", requiring(Require::Map(map), &as_map));

        h.compile_and_link("<div parent><i list named></i></div>");
        let list = as_array.get();
        assert_eq!(list.get("0").get("name"), Value::from("parent"));
        assert_eq!(list.get("1"), Value::Null);
        assert_eq!(as_map.get().get("parent").get("name"), Value::from("parent"));
    }

    #[test]
    fn test_missing_required_controller_is_ctreq() {
        let h = Harness::new();
        let captured = Captured::new();
        h.register("lost", requiring(Require::One("nowhere".to_string()), &captured));

        let (_, link) = h.compile("<div lost></div>");
        let err = link.link_to(&h.scope()).unwrap_err();
        assert_eq!(err.code(), "ctreq");
        assert!(err.to_string().contains("'nowhere'"));
        assert!(!captured.is_set());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BINDINGS ON CONTROLLERS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_bind_to_controller_with_require_map() {
        let h = Harness::new();
        parent_directive(&h);
        let seen_in_constructor = Captured::new();
        let seen = seen_in_constructor.clone();
        let mut bindings = IndexMap::new();
        bindings.insert("value".to_string(), "<".to_string());
        let mut require = IndexMap::new();
        require.insert("up".to_string(), "^parent".to_string());
        let captured = Captured::new();
        let instance = captured.clone();

        h.register(
            "bound",
            DirectiveDefinition {
                scope: ScopeRequest::Isolate(bindings),
                bind_to_controller: BindToController::On,
                controller_as: Some("vm".to_string()),
                controller: Some(ControllerSpec::factory(move |_, this| {
                    seen.set(this.get("value"));
                    instance.set(this.clone());
                    Ok(Value::Undefined)
                })),
                require: Require::Map(require),
                ..Default::default()
            },
        );
        h.scope().set("answer", Value::from(42));

        h.compile_and_link("<div parent><div bound value=\"answer\"></div></div>");
        assert_eq!(seen_in_constructor.get(), Value::from(42));
        let vm = captured.get();
        assert_eq!(vm.get("up").get("name"), Value::from("parent"));

        h.scope().set("answer", Value::from(43));
        h.digest();
        assert_eq!(vm.get("value"), Value::from(43));
    }

    #[test]
    fn test_bindings_follow_replacement_instance() {
        let h = Harness::new();
        let mut bindings = IndexMap::new();
        bindings.insert("value".to_string(), "<".to_string());
        let replacement = Value::object_from([("own", Value::Bool(true))]);
        let returned = replacement.clone();
        h.register(
            "replacing",
            DirectiveDefinition {
                scope: ScopeRequest::Isolate(IndexMap::new()),
                bind_to_controller: BindToController::Bindings(bindings),
                controller_as: Some("vm".to_string()),
                controller: Some(ControllerSpec::factory(move |_, _| Ok(returned.clone()))),
                ..Default::default()
            },
        );
        h.scope().set("answer", Value::from(1));

        h.compile_and_link("<div replacing value=\"answer\"></div>");
        assert_eq!(replacement.get("value"), Value::from(1));

        h.scope().set("answer", Value::from(2));
        h.digest();
        assert_eq!(replacement.get("value"), Value::from(2));
    }

    #[test]
    fn test_bind_to_controller_without_identifier_fails() {
        let h = Harness::new();
        h.register(
            "anonymous",
            DirectiveDefinition {
                scope: ScopeRequest::Isolate(IndexMap::new()),
                bind_to_controller: BindToController::On,
                controller: Some(ControllerSpec::factory(|_, _| Ok(Value::Undefined))),
                ..Default::default()
            },
        );

        let err = h.compiler.compile_html("<div anonymous></div>").err().unwrap();
        assert_eq!(err.code(), "noident");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LIFECYCLE HOOKS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_failing_hook_does_not_stop_other_controllers() {
        let h = Harness::new();
        h.register(
            "aFails",
            DirectiveDefinition {
                controller: Some(ControllerSpec::factory(|_, this| {
                    this.set(
                        "$onInit",
                        Value::function(|_, _| Err(Error::callback("init failed"))),
                    );
                    Ok(Value::Undefined)
                })),
                ..Default::default()
            },
        );
        h.register(
            "bWorks",
            DirectiveDefinition {
                controller: logging_controller(&h.log, "works"),
                ..Default::default()
            },
        );

        h.compile_and_link("<div a-fails b-works></div>");
        assert_eq!(h.errors.codes(), vec!["callback"]);
        assert!(h.log.entries().contains(&"$onInit works".to_string()));
        assert!(h.log.entries().contains(&"$postLink works".to_string()));
    }

    #[test]
    fn test_on_destroy_runs_with_scope() {
        let h = Harness::new();
        h.register(
            "mortal",
            DirectiveDefinition {
                controller: logging_controller(&h.log, "mortal"),
                ..Default::default()
            },
        );

        let (_, link) = h.compile("<div mortal></div>");
        let child = h.scope().new_child(false);
        link.link_to(&child).unwrap();
        assert!(!h.log.entries().contains(&"$onDestroy mortal".to_string()));

        child.destroy();
        assert!(h.log.entries().contains(&"$onDestroy mortal".to_string()));
    }

    #[test]
    fn test_do_check_runs_every_digest() {
        let h = Harness::new();
        let checks = Log::default();
        let counter = checks.clone();
        h.register(
            "checker",
            DirectiveDefinition {
                controller: Some(ControllerSpec::factory(move |_, this| {
                    let counter = counter.clone();
                    this.set(
                        "$doCheck",
                        Value::function(move |_, _| {
                            counter.push("check");
                            Ok(Value::Undefined)
                        }),
                    );
                    Ok(Value::Undefined)
                })),
                ..Default::default()
            },
        );

        h.compile_and_link("<div checker></div>");
        let after_link = checks.entries().len();
        assert!(after_link >= 2);

        h.digest();
        assert!(checks.entries().len() > after_link);
    }
}
