//! Transclusion Tests
//!
//! Element and content transclusion, the scopes transcluded content links
//! against, and named slots.

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use crate::test_support::{Harness, Log};
    use crate::{
        transclusion_outlet, DirectiveDefinition, LinkFns, NodeList, Scope, ScopeRequest,
        TemplateSource, TranscludeMode, Value,
    };

    /// Link function that transcludes `times` clones and appends them to the
    /// parent of the element (element transclusion) or the element itself.
    fn repeat_into(times: i32, into_parent: bool) -> LinkFns {
        LinkFns::post(move |ctx| {
            let transclude = ctx.transclude.clone().expect("transclude available");
            let target = if into_parent {
                ctx.element.parent().expect("element has a parent")
            } else {
                ctx.element.clone()
            };
            for index in 1..=times {
                let target = target.clone();
                transclude.clone_attach(move |clone: &NodeList, scope: &Scope| {
                    scope.set("index", Value::from(index));
                    for node in clone.to_vec() {
                        target.append_child(&node);
                    }
                })?;
            }
            Ok(())
        })
    }

    /// Appends the named slot (or the default content when the `slot-outlet`
    /// attribute is empty) to the element.
    fn slot_outlet() -> DirectiveDefinition {
        DirectiveDefinition {
            link: LinkFns::post(|ctx| {
                let Some(transclude) = &ctx.transclude else {
                    return Ok(());
                };
                let slot = ctx.attrs.get("slotOutlet").to_display_string();
                let target = ctx.element.clone();
                transclude.transclude(
                    None,
                    Some(Rc::new(move |clone: &NodeList, _: &Scope| {
                        for node in clone.to_vec() {
                            target.append_child(&node);
                        }
                    })),
                    None,
                    (!slot.is_empty()).then_some(slot.as_str()),
                )?;
                Ok(())
            }),
            ..Default::default()
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ELEMENT TRANSCLUSION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_element_transclusion_clones_element() {
        let h = Harness::new();
        h.register(
            "trans",
            DirectiveDefinition {
                transclude: TranscludeMode::Element,
                link: repeat_into(2, true),
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<div><div trans>Hello</div></div>");
        let wrapper = nodes.first().unwrap();
        assert_eq!(wrapper.text_content(), "HelloHello");

        let children = wrapper.children();
        assert_eq!(children.len(), 3);
        assert!(children[0].is_comment());
        assert_eq!(children[0].value(), " trans:  ");
        assert!(children[1].has_attr("trans"));
    }

    #[test]
    fn test_element_transclusion_three_copies() {
        let h = Harness::new();
        h.register(
            "trans",
            DirectiveDefinition {
                transclude: TranscludeMode::Element,
                link: repeat_into(3, true),
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<div><div trans>Hello</div></div>");
        assert_eq!(nodes.text(), "HelloHelloHello");
    }

    #[test]
    fn test_root_element_transclusion_keeps_clones() {
        let h = Harness::new();
        h.register(
            "trans",
            DirectiveDefinition {
                transclude: TranscludeMode::Element,
                link: repeat_into(2, true),
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<div trans>Hello</div>");
        let marker = nodes.first().unwrap();
        assert!(marker.is_comment());

        let container = marker.parent().expect("root adopted by a container");
        assert_eq!(container.text_content(), "HelloHello");
        assert_eq!(container.children().len(), 3);
    }

    #[test]
    fn test_each_element_clone_gets_own_scope() {
        let h = Harness::new();
        h.register(
            "repeat",
            DirectiveDefinition {
                priority: 1000,
                transclude: TranscludeMode::Element,
                link: repeat_into(3, true),
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<ul><li repeat>{{index}};</li></ul>");
        assert_eq!(nodes.text(), "1;2;3;");
        assert!(h.scope().get("index").is_undefined());
    }

    #[test]
    fn test_lower_priority_directives_apply_to_clones() {
        let h = Harness::new();
        h.register(
            "repeat",
            DirectiveDefinition {
                priority: 1000,
                transclude: TranscludeMode::Element,
                link: repeat_into(2, true),
                ..Default::default()
            },
        );
        h.register(
            "marker",
            DirectiveDefinition {
                link: h.log.link_fns("marker"),
                ..Default::default()
            },
        );

        h.compile_and_link("<div><p repeat marker></p></div>");
        assert_eq!(
            h.log.entries(),
            vec!["pre marker", "post marker", "pre marker", "post marker"]
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONTENT TRANSCLUSION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_content_transclusion_repeated() {
        let h = Harness::new();
        h.register(
            "wrap",
            DirectiveDefinition {
                transclude: TranscludeMode::Content,
                link: repeat_into(3, false),
                ..Default::default()
            },
        );

        let nodes = h.compile_and_link("<div wrap>Hello</div>");
        assert_eq!(nodes.text(), "HelloHelloHello");
    }

    #[test]
    fn test_transcluded_content_binds_to_outer_scope() {
        let h = Harness::new();
        h.register(
            "pane",
            DirectiveDefinition {
                scope: ScopeRequest::Isolate(IndexMap::new()),
                transclude: TranscludeMode::Content,
                template: Some(TemplateSource::markup(
                    "<span>{{name}}</span>|<div slot-outlet=\"\"></div>",
                )),
                link: LinkFns::pre(|ctx| {
                    ctx.scope.set("name", Value::from("inner"));
                    Ok(())
                }),
                ..Default::default()
            },
        );
        h.register("slotOutlet", slot_outlet());
        h.scope().set("name", Value::from("outer"));

        let nodes = h.compile_and_link("<div pane><b>{{name}}</b></div>");
        assert_eq!(nodes.text(), "inner|outer");
    }

    #[test]
    fn test_transclude_without_attach_appends_to_element() {
        let h = Harness::new();
        h.register(
            "wrap",
            DirectiveDefinition {
                transclude: TranscludeMode::Content,
                link: LinkFns::post(|ctx| {
                    if let Some(transclude) = &ctx.transclude {
                        transclude.transclude(None, None, None, None)?;
                    }
                    Ok(())
                }),
                ..Default::default()
            },
        );
        h.scope().set("name", Value::from("x"));

        let nodes = h.compile_and_link("<div wrap><b>{{name}}</b></div>");
        let element = nodes.first().unwrap();
        assert_eq!(element.text_content(), "x");
        assert_eq!(element.children()[0].tag_name(), "b");
    }

    #[test]
    fn test_two_transclusions_on_one_element_is_multidir() {
        let h = Harness::new();
        for name in ["first", "second"] {
            h.register(
                name,
                DirectiveDefinition {
                    transclude: TranscludeMode::Content,
                    ..Default::default()
                },
            );
        }

        let err = h.compiler.compile_html("<div first second>x</div>").err().unwrap();
        assert_eq!(err.code(), "multidir");
        assert!(err.to_string().contains("transclusion"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SLOTS
    // ═══════════════════════════════════════════════════════════════════════════════

    fn card(h: &Harness, slots: &[(&str, &str)]) {
        let filled = h.log.clone();
        h.register(
            "card",
            DirectiveDefinition {
                transclude: TranscludeMode::Slots(
                    slots
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                template: Some(TemplateSource::markup(
                    "<h1 slot-outlet=\"title\"></h1><div slot-outlet=\"body\"></div><footer slot-outlet=\"\"></footer>",
                )),
                link: LinkFns::post(move |ctx| {
                    if let Some(transclude) = &ctx.transclude {
                        for slot in ["title", "body"] {
                            filled.push(format!("{}={}", slot, transclude.is_slot_filled(slot)));
                        }
                    }
                    Ok(())
                }),
                ..Default::default()
            },
        );
        h.register("slotOutlet", slot_outlet());
    }

    #[test]
    fn test_named_slots_and_default_content() {
        let h = Harness::new();
        card(&h, &[("title", "cardTitle"), ("body", "?cardBody")]);

        let nodes = h.compile_and_link("<card><card-title>Title</card-title><span>rest</span></card>");
        let parts: Vec<String> = nodes
            .first()
            .unwrap()
            .children()
            .iter()
            .map(|child| child.text_content())
            .collect();
        assert_eq!(parts, vec!["Title", "", "rest"]);
        assert_eq!(h.log.entries(), vec!["title=true", "body=false"]);
    }

    #[test]
    fn test_missing_required_slot_is_reqslot() {
        let h = Harness::new();
        card(&h, &[("title", "cardTitle"), ("body", "?cardBody")]);

        let err = h
            .compiler
            .compile_html("<card><span>no title</span></card>")
            .err()
            .unwrap();
        assert_eq!(err.code(), "reqslot");
    }

    #[test]
    fn test_unknown_slot_is_reported() {
        let h = Harness::new();
        h.register(
            "holder",
            DirectiveDefinition {
                transclude: TranscludeMode::Content,
                template: Some(TemplateSource::markup("<i slot-outlet=\"nonexistent\"></i>")),
                ..Default::default()
            },
        );
        h.register("slotOutlet", slot_outlet());

        h.compile_and_link("<div holder>content</div>");
        assert_eq!(h.errors.codes(), vec!["noslot"]);
    }

    #[test]
    fn test_no_transclude_handle_without_transclusion() {
        let h = Harness::new();
        let seen = Log::default();
        let sink = seen.clone();
        h.register(
            "plain",
            DirectiveDefinition {
                link: LinkFns::post(move |ctx| {
                    sink.push(format!("{}", ctx.transclude.is_some()));
                    Ok(())
                }),
                ..Default::default()
            },
        );

        h.compile_and_link("<div plain></div>");
        assert_eq!(seen.entries(), vec!["false"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // OUTLET FALLBACK CONTENT
    // ═══════════════════════════════════════════════════════════════════════════════

    fn panel(h: &Harness) {
        let mut slots = IndexMap::new();
        slots.insert("title".to_string(), "?panelTitle".to_string());
        h.register(
            "panel",
            DirectiveDefinition {
                transclude: TranscludeMode::Slots(slots),
                template: Some(TemplateSource::markup(
                    "<h2><outlet outlet-slot=\"title\">Untitled</outlet></h2><div outlet>Nothing here</div>",
                )),
                ..Default::default()
            },
        );
        h.register("outlet", transclusion_outlet("outlet"));
    }

    fn panel_parts(nodes: &NodeList) -> Vec<String> {
        nodes
            .first()
            .unwrap()
            .children()
            .iter()
            .map(|child| child.text_content())
            .collect()
    }

    #[test]
    fn test_filled_slot_replaces_fallback() {
        let h = Harness::new();
        panel(&h);

        let nodes = h.compile_and_link("<panel><panel-title>News</panel-title><p>body</p></panel>");
        assert_eq!(panel_parts(&nodes), vec!["News", "body"]);
        assert!(h.errors.codes().is_empty());
    }

    #[test]
    fn test_unfilled_slot_keeps_fallback() {
        let h = Harness::new();
        panel(&h);

        let nodes = h.compile_and_link("<panel><p>body</p></panel>");
        assert_eq!(panel_parts(&nodes), vec!["Untitled", "body"]);
    }

    #[test]
    fn test_whitespace_content_keeps_fallback() {
        let h = Harness::new();
        panel(&h);

        let nodes = h.compile_and_link("<panel><panel-title>News</panel-title> </panel>");
        assert_eq!(panel_parts(&nodes), vec!["News", "Nothing here"]);
    }

    #[test]
    fn test_fallback_links_against_outlet_scope() {
        let h = Harness::new();
        h.register(
            "holder",
            DirectiveDefinition {
                transclude: TranscludeMode::Content,
                template: Some(TemplateSource::markup("<span outlet>{{fallback}}</span>")),
                ..Default::default()
            },
        );
        h.register("outlet", transclusion_outlet("outlet"));
        h.scope().set("fallback", Value::from("default"));

        let nodes = h.compile_and_link("<div holder></div>");
        assert_eq!(nodes.text(), "default");
    }

    #[test]
    fn test_outlet_without_transclusion_is_orphan() {
        let h = Harness::new();
        h.register("outlet", transclusion_outlet("outlet"));

        h.compile_and_link("<div><span outlet>kept</span></div>");
        assert_eq!(h.errors.codes(), vec!["orphan"]);
    }
}
