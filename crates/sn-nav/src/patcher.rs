//! Applies a fetched document to the live one.

use crate::config::CompiledConfig;
use crate::fetcher::FetchedDocument;
use crate::interceptor::LinkInterceptor;
use sn_core::NavError;
use sn_core::NavResult;
use sn_dom::Document;
use sn_dom::NodeId;
use sn_dom::SelectorList;
use sn_js::HostElement;
use sn_js::InlineScript;
use sn_js::ScriptHost;

/// Counts of what one patch pass changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub text_updated: usize,
    pub attributes_updated: usize,
    pub attributes_removed: usize,
    pub links_wired: usize,
    pub scripts_run: usize,
    pub scripts_failed: usize,
    pub scripts_skipped: usize,
    /// Set when a script assigned `document.title`.
    pub title_from_scripts: bool,
    /// Nodes freed after the swap: the old container and the temporary script elements.
    pub nodes_freed: usize,
    /// Container that was swapped out. It has been freed, so the id no longer resolves.
    pub old_container: NodeId,
    pub new_container: NodeId,
}

/// Returns the single element `container` matches in `document`.
pub fn unique_container(
    document: &Document,
    container: &SelectorList,
    which: &str,
) -> NavResult<NodeId> {
    let matches = document.query_selector_all(container);
    match matches.as_slice() {
        [single] => Ok(*single),
        [] => Err(NavError::new(
            "nav.patch.container_missing",
            format!("no element matches `{container}` in the {which} document"),
        )),
        many => Err(NavError::new(
            "nav.patch.container_ambiguous",
            format!(
                "`{container}` matches {} elements in the {which} document",
                many.len()
            ),
        )),
    }
}

/// Copies configured text and attributes, swaps the container, and runs the
/// incoming inline scripts.
///
/// Both containers are checked before anything is touched, so an error return
/// leaves `live` unchanged.
pub fn patch(
    config: &CompiledConfig,
    live: &mut Document,
    fetched: &FetchedDocument,
    interceptor: &mut LinkInterceptor,
    scripts: &mut dyn ScriptHost,
) -> NavResult<PatchReport> {
    let incoming = &fetched.document;
    let old_container = unique_container(live, &config.container, "live")?;
    let fetched_container = unique_container(incoming, &config.container, "fetched")?;

    // Detached until the swap below.
    let imported = live.import_subtree(incoming, fetched_container)?;

    let text_updated = copy_text(config, live, incoming)?;
    let (attributes_updated, attributes_removed) = copy_attributes(config, live, incoming)?;

    let incoming_links = incoming
        .query_selector_all_within(fetched_container, &config.links)
        .into_iter()
        .filter_map(|node| imported.get(node));
    let links_wired = interceptor.attach(incoming_links);

    live.replace_with(old_container, imported.root)?;
    let new_container = imported.root;

    let mut report = PatchReport {
        text_updated,
        attributes_updated,
        attributes_removed,
        links_wired,
        scripts_run: 0,
        scripts_failed: 0,
        scripts_skipped: 0,
        title_from_scripts: false,
        nodes_freed: 0,
        old_container,
        new_container,
    };
    run_scripts(live, fetched, fetched_container, scripts, &mut report)?;

    report.nodes_freed += live.remove(old_container)?;
    let pruned = interceptor.prune(live);
    tracing::debug!(
        url = %fetched.url,
        text_updated = report.text_updated,
        attributes_updated = report.attributes_updated,
        attributes_removed = report.attributes_removed,
        links_wired = report.links_wired,
        links_pruned = pruned,
        scripts_run = report.scripts_run,
        nodes_freed = report.nodes_freed,
        "patched live document"
    );
    Ok(report)
}

fn copy_text(config: &CompiledConfig, live: &mut Document, incoming: &Document) -> NavResult<usize> {
    let mut updated = 0_usize;
    for selector in &config.text_content {
        let targets = live.query_selector_all(selector);
        let sources = incoming.query_selector_all(selector);
        for (target, source) in targets.into_iter().zip(sources) {
            live.set_text_content(target, &incoming.text_content(source))?;
            updated += 1;
        }
    }
    Ok(updated)
}

fn copy_attributes(
    config: &CompiledConfig,
    live: &mut Document,
    incoming: &Document,
) -> NavResult<(usize, usize)> {
    let mut updated = 0_usize;
    let mut removed = 0_usize;
    for (selector, name) in &config.attributes {
        let targets = live.query_selector_all(selector);
        let sources = incoming.query_selector_all(selector);
        for (target, source) in targets.into_iter().zip(sources) {
            match incoming.attr(source, name) {
                Some(value) => {
                    live.set_attr(target, name, value)?;
                    updated += 1;
                }
                None => {
                    if live.remove_attr(target, name)? {
                        removed += 1;
                    }
                }
            }
        }
    }
    Ok((updated, removed))
}

/// Re-creates each inline script in the live document, evaluates it, and
/// removes it again. Order follows the fetched container.
///
/// Scripts see the elements of the patched page by id. A title they assign is
/// written back to the live `<title>` after each script.
fn run_scripts(
    live: &mut Document,
    fetched: &FetchedDocument,
    fetched_container: NodeId,
    scripts: &mut dyn ScriptHost,
    report: &mut PatchReport,
) -> NavResult<()> {
    let incoming = &fetched.document;
    let candidates: Vec<NodeId> = incoming
        .descendants(fetched_container)
        .into_iter()
        .filter(|node| {
            incoming
                .tag_name(*node)
                .is_some_and(|tag| tag.eq_ignore_ascii_case("script"))
        })
        .collect();
    if candidates.is_empty() {
        return Ok(());
    }

    if let Err(error) = scripts.set_document_title(&live.title()) {
        tracing::warn!(%error, "failed to mirror document title into script host");
    }
    if let Err(error) = scripts.set_elements(&host_elements(live)) {
        tracing::warn!(%error, "failed to expose live elements to script host");
    }

    let host_parent = live
        .head()
        .or_else(|| live.body())
        .or_else(|| live.document_element())
        .unwrap_or(live.root());

    for (position, node) in candidates.into_iter().enumerate() {
        let source = incoming.text_content(node);
        if !script_is_executable(incoming, node) || source.trim().is_empty() {
            report.scripts_skipped += 1;
            continue;
        }

        let element = live.create_element("script");
        let text = live.create_text(source.clone());
        live.append_child(element, text)?;
        live.append_child(host_parent, element)?;

        let script = InlineScript {
            origin: format!("{}#script-{position}", fetched.url),
            source,
        };
        match scripts.execute(&script) {
            Ok(()) => report.scripts_run += 1,
            Err(error) => {
                report.scripts_failed += 1;
                tracing::warn!(origin = %script.origin, %error, "inline script failed");
            }
        }

        report.nodes_freed += live.remove(element)?;
        if apply_script_title(live, scripts)? {
            report.title_from_scripts = true;
        }
    }
    Ok(())
}

/// Connected elements carrying an `id`, in document order.
fn host_elements(live: &Document) -> Vec<HostElement> {
    live.descendants(live.root())
        .into_iter()
        .filter_map(|node| {
            let element = live.element(node)?;
            let id = live.attr(node, "id")?;
            Some(HostElement {
                id: id.to_owned(),
                tag_name: element.tag.to_ascii_uppercase(),
                text_content: live.text_content(node),
                attributes: element.attrs.clone(),
            })
        })
        .collect()
}

/// Copies `document.title` from the script host into the live `<title>`.
fn apply_script_title(live: &mut Document, scripts: &mut dyn ScriptHost) -> NavResult<bool> {
    let Some(title) = scripts.document_title() else {
        return Ok(false);
    };
    if title == live.title() {
        return Ok(false);
    }

    let element = match live.first_element_by_tag("title") {
        Some(element) => element,
        None => {
            let Some(head) = live.head() else {
                tracing::debug!("script set a title but the page has no head");
                return Ok(false);
            };
            let element = live.create_element("title");
            live.append_child(head, element)?;
            element
        }
    };
    live.set_text_content(element, &title)?;
    Ok(true)
}

fn script_is_executable(document: &Document, node: NodeId) -> bool {
    let script_type = document
        .attr(node, "type")
        .or_else(|| document.attr(node, "language"))
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if script_type.is_empty() {
        return true;
    }

    if script_type == "module" {
        return false;
    }

    script_type.contains("javascript")
        || script_type.contains("ecmascript")
        || script_type == "text/jscript"
        || script_type == "application/x-javascript"
}

#[cfg(test)]
mod tests {
    use super::patch;
    use super::script_is_executable;
    use crate::config::CompiledConfig;
    use crate::config::NavConfig;
    use crate::config::ReplaceConfig;
    use crate::fetcher::FetchedDocument;
    use crate::interceptor::LinkInterceptor;
    use sn_core::NavError;
    use sn_core::NavResult;
    use sn_dom::Document;
    use sn_dom::serialize::inner_html;
    use sn_html::HtmlParser;
    use sn_js::HostElement;
    use sn_js::InlineScript;
    use sn_js::ScriptHost;
    use sn_net::NavUrl;

    #[derive(Default)]
    struct RecordingHost {
        sources: Vec<String>,
        title: String,
        elements: Vec<HostElement>,
        fail_on: Option<&'static str>,
    }

    impl ScriptHost for RecordingHost {
        fn execute(&mut self, script: &InlineScript) -> NavResult<()> {
            if self.fail_on.is_some_and(|needle| script.source.contains(needle)) {
                return Err(NavError::new("js.script_failed", "boom"));
            }
            if let Some(title) = script.source.strip_prefix("document.title=") {
                title.clone_into(&mut self.title);
            }
            self.sources.push(script.source.clone());
            Ok(())
        }

        fn set_location(&mut self, _href: &str) -> NavResult<()> {
            Ok(())
        }

        fn set_document_title(&mut self, title: &str) -> NavResult<()> {
            title.clone_into(&mut self.title);
            Ok(())
        }

        fn set_elements(&mut self, elements: &[HostElement]) -> NavResult<()> {
            self.elements = elements.to_vec();
            Ok(())
        }

        fn document_title(&mut self) -> Option<String> {
            Some(self.title.clone())
        }
    }

    fn compiled(config: NavConfig) -> CompiledConfig {
        match config.compile() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn fetched(html: &str) -> FetchedDocument {
        let url = match NavUrl::parse("https://site.test/next") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        FetchedDocument {
            url,
            status: 200,
            document: HtmlParser.parse(html),
        }
    }

    fn first(document: &Document, selector: &str) -> sn_dom::NodeId {
        match document.select(selector) {
            Ok(nodes) if !nodes.is_empty() => nodes[0],
            Ok(_) => panic!("nothing matches {selector}"),
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn copies_text_positionally_and_leaves_extra_targets_alone() {
        let config = compiled(
            NavConfig::default()
                .with_replace(ReplaceConfig::empty().with_text_content("h2"))
                .with_container("main"),
        );
        let mut live = HtmlParser.parse(
            "<body><h2>one</h2><h2>two</h2><main>old</main></body>",
        );
        let incoming = fetched("<body><h2>uno</h2><main>new</main></body>");
        let mut host = RecordingHost::default();

        let report = match patch(&config, &mut live, &incoming, &mut LinkInterceptor::new(), &mut host) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let headings = match live.select("h2") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(report.text_updated, 1);
        assert_eq!(live.text_content(headings[0]), "uno");
        assert_eq!(live.text_content(headings[1]), "two");
    }

    #[test]
    fn copies_and_removes_attributes() {
        let config = compiled(NavConfig::default());
        let mut live = HtmlParser.parse(
            r#"<head><meta name="description" content="old"><link rel="canonical" href="/old"></head><main></main>"#,
        );
        let incoming = fetched(
            r#"<head><meta name="description" content="new"><link rel="canonical"></head><main></main>"#,
        );
        let mut host = RecordingHost::default();

        let report = match patch(&config, &mut live, &incoming, &mut LinkInterceptor::new(), &mut host) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(report.attributes_updated, 1);
        assert_eq!(report.attributes_removed, 1);
        assert_eq!(live.attr(first(&live, "meta"), "content"), Some("new"));
        assert_eq!(live.attr(first(&live, "link"), "href"), None);
    }

    #[test]
    fn swaps_container_and_wires_incoming_links() {
        let config = compiled(NavConfig::default());
        let mut live = HtmlParser.parse("<main><p>A</p></main><footer><a data-nav href=/x>x</a></footer>");
        let incoming = fetched(
            "<nav><a data-nav href=/outside>o</a></nav><main><p>B</p><a data-nav href=/y>y</a><a href=/z>z</a></main>",
        );
        let mut interceptor = LinkInterceptor::new();
        let mut host = RecordingHost::default();

        let report = match patch(&config, &mut live, &incoming, &mut interceptor, &mut host) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_ne!(report.old_container, report.new_container);
        assert!(!live.is_connected(report.old_container));
        assert!(!live.contains(report.old_container));
        assert_eq!(report.nodes_freed, 3);
        assert_eq!(report.links_wired, 1);
        assert_eq!(
            inner_html(&live, report.new_container),
            r#"<p>B</p><a data-nav="" href="/y">y</a><a href="/z">z</a>"#
        );
        assert!(interceptor.is_wired(first(&live, "main a[data-nav]")));
    }

    #[test]
    fn runs_executable_scripts_once_in_order() {
        let config = compiled(NavConfig::default());
        let mut live = HtmlParser.parse("<head><title>Old</title></head><main>A</main>");
        let incoming = fetched(concat!(
            "<title>New</title><main>B",
            "<script>first()</script>",
            "<script type=module>skipped()</script>",
            "<script type=application/ld+json>{}</script>",
            "<script>   </script>",
            "<script>broken()</script>",
            "<script type=text/javascript>second()</script>",
            "</main>"
        ));
        let mut host = RecordingHost {
            fail_on: Some("broken"),
            ..RecordingHost::default()
        };

        let report = match patch(&config, &mut live, &incoming, &mut LinkInterceptor::new(), &mut host) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(host.sources, vec!["first()".to_owned(), "second()".to_owned()]);
        assert_eq!(host.title, "New");
        assert_eq!(report.scripts_run, 2);
        assert_eq!(report.scripts_failed, 1);
        assert_eq!(report.scripts_skipped, 3);
        let head = match live.head() {
            Some(value) => value,
            None => panic!("missing head"),
        };
        assert_eq!(live.children(head).len(), 1);
    }

    #[test]
    fn scripts_see_live_elements_and_their_title_is_written_back() {
        let config = compiled(NavConfig::default());
        let mut live = HtmlParser.parse(
            "<head><title>Old</title></head><main id=page>A</main><footer id=foot>f</footer>",
        );
        let incoming = fetched(concat!(
            "<title>New</title><main id=page><span id=count class=badge>3</span>",
            "<script>document.title=Set by script</script>",
            "</main>"
        ));
        let mut host = RecordingHost::default();
        let before = live.node_count();

        let report = match patch(&config, &mut live, &incoming, &mut LinkInterceptor::new(), &mut host) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let ids: Vec<&str> = host.elements.iter().map(|element| element.id.as_str()).collect();
        assert_eq!(ids, vec!["page", "count", "foot"]);
        assert_eq!(host.elements[1].tag_name, "SPAN");
        assert_eq!(host.elements[1].text_content, "3");
        assert!(host.elements[1]
            .attributes
            .contains(&("class".to_owned(), "badge".to_owned())));

        assert!(report.title_from_scripts);
        assert_eq!(live.title(), "Set by script");
        // Old container (main + text), the script element and its text.
        assert_eq!(report.nodes_freed, 4);
        // New container brings main, span, its text and the script with its text.
        assert_eq!(live.node_count(), before - 2 + 5);
    }

    #[test]
    fn bad_containers_leave_the_page_untouched() {
        let config = compiled(NavConfig::default());
        let html = "<title>Old</title><main>A</main>";
        let mut live = HtmlParser.parse(html);
        let mut host = RecordingHost::default();

        let missing = patch(
            &config,
            &mut live,
            &fetched("<title>New</title><div>B</div>"),
            &mut LinkInterceptor::new(),
            &mut host,
        );
        assert!(matches!(missing, Err(error) if error.code == "nav.patch.container_missing"));

        let ambiguous = patch(
            &config,
            &mut live,
            &fetched("<title>New</title><main>B</main><main>C</main>"),
            &mut LinkInterceptor::new(),
            &mut host,
        );
        assert!(matches!(ambiguous, Err(error) if error.code == "nav.patch.container_ambiguous"));
        assert_eq!(live.title(), "Old");
    }

    #[test]
    fn recognizes_executable_script_types() {
        let document = HtmlParser.parse(concat!(
            "<script></script>",
            "<script language=JavaScript></script>",
            "<script type=text/ecmascript></script>",
            "<script type=module></script>",
            "<script type=text/template></script>",
        ));
        let verdicts: Vec<bool> = match document.select("script") {
            Ok(nodes) => nodes
                .into_iter()
                .map(|node| script_is_executable(&document, node))
                .collect(),
            Err(error) => panic!("{error}"),
        };
        assert_eq!(verdicts, vec![true, true, true, false, false]);
    }
}
