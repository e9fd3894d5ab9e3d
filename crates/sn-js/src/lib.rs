//! Inline script execution for swapped-in content.

use boa_engine::Context;
use boa_engine::Source;
use sn_core::NavError;
use sn_core::NavResult;
use std::collections::HashSet;

const BOOTSTRAP_ENV: &str = r##"
globalThis.window = globalThis;
globalThis.self = globalThis;
globalThis.console = {
  log: function () {},
  info: function () {},
  warn: function () {},
  error: function () {}
};
globalThis.__sn_make_event_target = function (target) {
  var listeners = {};
  target.addEventListener = function (type, handler) {
    var key = String(type || "");
    if (!key || typeof handler !== "function") {
      return;
    }
    (listeners[key] = listeners[key] || []).push(handler);
  };
  target.removeEventListener = function (type, handler) {
    var list = listeners[String(type || "")];
    if (!list) {
      return;
    }
    var index = list.indexOf(handler);
    if (index >= 0) {
      list.splice(index, 1);
    }
  };
  target.dispatchEvent = function (event) {
    var list = listeners[String((event && event.type) || "")] || [];
    for (var i = 0; i < list.length; i++) {
      list[i].call(this, event);
    }
    return true;
  };
  return target;
};
globalThis.__sn_elements = {};
globalThis.__sn_element = function (node) {
  if (!node) {
    return null;
  }
  return globalThis.__sn_make_event_target({
    id: node.id,
    tagName: node.tagName,
    textContent: node.textContent,
    innerText: node.textContent,
    style: {},
    getAttribute: function (name) {
      var key = String(name).toLowerCase();
      return Object.prototype.hasOwnProperty.call(node.attributes, key)
        ? node.attributes[key]
        : null;
    },
    hasAttribute: function (name) {
      return Object.prototype.hasOwnProperty.call(node.attributes, String(name).toLowerCase());
    },
    setAttribute: function (name, value) {
      node.attributes[String(name).toLowerCase()] = String(value);
    },
    appendChild: function (child) { return child; },
    removeChild: function (child) { return child; }
  });
};
globalThis.location = globalThis.__sn_make_event_target({
  href: "",
  toString: function () { return this.href; }
});
globalThis.document = globalThis.__sn_make_event_target({
  title: "",
  readyState: "complete",
  location: globalThis.location,
  body: globalThis.__sn_make_event_target({}),
  documentElement: globalThis.__sn_make_event_target({}),
  getElementById: function (id) {
    if (id == null) {
      return null;
    }
    var key = String(id);
    if (!Object.prototype.hasOwnProperty.call(globalThis.__sn_elements, key)) {
      return null;
    }
    return globalThis.__sn_element(globalThis.__sn_elements[key]);
  },
  querySelector: function (selector) {
    if (typeof selector === "string" && selector.charAt(0) === "#") {
      return this.getElementById(selector.slice(1));
    }
    return null;
  },
  querySelectorAll: function (selector) {
    var node = this.querySelector(selector);
    return node ? [node] : [];
  },
  createElement: function (tag) {
    return globalThis.__sn_element({
      id: "",
      tagName: String(tag || "").toUpperCase(),
      textContent: "",
      attributes: {}
    });
  }
});
globalThis.__sn_timer_queue = [];
globalThis.__sn_timer_cancelled = {};
globalThis.__sn_next_timer_id = 1;
globalThis.setTimeout = function (callback, _delay) {
  var cb = callback;
  if (typeof cb !== "function") {
    var src = String(callback);
    cb = function () { (0, eval)(src); };
  }
  var id = globalThis.__sn_next_timer_id++;
  globalThis.__sn_timer_queue.push({ id: id, cb: cb });
  return id;
};
globalThis.clearTimeout = function (id) {
  globalThis.__sn_timer_cancelled[String(id)] = true;
};
globalThis.queueMicrotask = function (callback) {
  globalThis.setTimeout(callback, 0);
};
globalThis.__sn_flush_timers = function (limit) {
  var runs = 0;
  while (globalThis.__sn_timer_queue.length > 0 && runs < limit) {
    var task = globalThis.__sn_timer_queue.shift();
    var cancelled = !!globalThis.__sn_timer_cancelled[String(task.id)];
    delete globalThis.__sn_timer_cancelled[String(task.id)];
    if (!cancelled) {
      task.cb();
    }
    runs++;
  }
  return runs;
};
"##;

const FLUSH_TIMERS: &[u8] = b"__sn_flush_timers(128);";
const READ_TITLE: &[u8] = b"(typeof document === 'object' && document !== null && 'title' in document) ? String(document.title) : ''";

/// Inline script payload lifted out of a fetched container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineScript {
    /// Where the script came from, for diagnostics (e.g. `https://a.test/post#script-2`).
    pub origin: String,
    pub source: String,
}

/// An element of the live document that scripts can look up by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostElement {
    pub id: String,
    pub tag_name: String,
    pub text_content: String,
    pub attributes: Vec<(String, String)>,
}

/// Evaluates inline scripts against page-lifetime state.
///
/// Implementations must keep global state between calls: a value assigned by
/// one script is visible to every later script and to the host.
pub trait ScriptHost {
    fn execute(&mut self, script: &InlineScript) -> NavResult<()>;

    /// Mirrors the current history location into the script environment.
    fn set_location(&mut self, href: &str) -> NavResult<()>;

    /// Mirrors the live document title into the script environment.
    fn set_document_title(&mut self, title: &str) -> NavResult<()>;

    /// Replaces the elements reachable through `document.getElementById`.
    fn set_elements(&mut self, _elements: &[HostElement]) -> NavResult<()> {
        Ok(())
    }

    /// `document.title` as scripts left it, when the host tracks one.
    fn document_title(&mut self) -> Option<String> {
        None
    }
}

/// Runtime hardening knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsRuntimeConfig {
    pub max_script_bytes: usize,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    pub loop_iteration_limit: u64,
}

impl Default for JsRuntimeConfig {
    fn default() -> Self {
        Self {
            max_script_bytes: 2 * 1024 * 1024,
            recursion_limit: 64,
            stack_size_limit: 1024,
            loop_iteration_limit: 100_000,
        }
    }
}

/// Boa-backed script host with one context for the page lifetime.
pub struct BoaScriptHost {
    context: Context,
    config: JsRuntimeConfig,
    executed: usize,
}

impl std::fmt::Debug for BoaScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoaScriptHost")
            .field("config", &self.config)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

impl BoaScriptHost {
    pub fn new(config: JsRuntimeConfig) -> NavResult<Self> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_recursion_limit(config.recursion_limit);
        context
            .runtime_limits_mut()
            .set_stack_size_limit(config.stack_size_limit);
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(config.loop_iteration_limit);
        context
            .eval(Source::from_bytes(BOOTSTRAP_ENV.as_bytes()))
            .map_err(|error| {
                NavError::new(
                    "js.bootstrap_failed",
                    format!("script environment bootstrap failed: {error}"),
                )
            })?;

        Ok(Self {
            context,
            config,
            executed: 0,
        })
    }

    /// Number of scripts that ran to completion.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Evaluates `source` and returns the completion value as a string.
    pub fn eval_string(&mut self, source: &str) -> NavResult<String> {
        let value = self
            .context
            .eval(Source::from_bytes(source.as_bytes()))
            .map_err(|error| NavError::new("js.eval_failed", error.to_string()))?;
        let text = value
            .to_string(&mut self.context)
            .map_err(|error| NavError::new("js.eval_failed", error.to_string()))?;
        Ok(text.to_std_string_escaped())
    }

    fn eval_quiet(&mut self, code: &'static str, source: &str) -> NavResult<()> {
        self.context
            .eval(Source::from_bytes(source.as_bytes()))
            .map(|_| ())
            .map_err(|error| NavError::new(code, error.to_string()))
    }
}

impl ScriptHost for BoaScriptHost {
    fn execute(&mut self, script: &InlineScript) -> NavResult<()> {
        let source_len = script.source.len();
        if source_len > self.config.max_script_bytes {
            return Err(NavError::new(
                "js.script_too_large",
                format!(
                    "script {} is {source_len} bytes, limit is {}",
                    script.origin, self.config.max_script_bytes
                ),
            ));
        }

        self.context
            .eval(Source::from_bytes(script.source.as_bytes()))
            .map_err(|error| {
                NavError::new(
                    "js.script_failed",
                    format!("script {} failed: {error}", script.origin),
                )
            })?;
        self.executed = self.executed.saturating_add(1);

        // Deferred callbacks queued by the script run before the next script.
        if let Err(error) = self.context.eval(Source::from_bytes(FLUSH_TIMERS)) {
            tracing::warn!(origin = %script.origin, %error, "deferred script callback failed");
        }
        Ok(())
    }

    fn set_location(&mut self, href: &str) -> NavResult<()> {
        let source = format!("globalThis.location.href = {};", js_string_literal(href));
        self.eval_quiet("js.location_failed", &source)
    }

    fn set_document_title(&mut self, title: &str) -> NavResult<()> {
        let source = format!("globalThis.document.title = {};", js_string_literal(title));
        self.eval_quiet("js.title_failed", &source)
    }

    fn set_elements(&mut self, elements: &[HostElement]) -> NavResult<()> {
        let source = format!(
            "globalThis.__sn_elements = {};",
            build_elements_by_id_object(elements)
        );
        self.eval_quiet("js.elements_failed", &source)
    }

    fn document_title(&mut self) -> Option<String> {
        let value = self.context.eval(Source::from_bytes(READ_TITLE)).ok()?;
        let text = value.to_string(&mut self.context).ok()?;
        Some(text.to_std_string_escaped())
    }
}

/// First element wins when ids repeat, as with `getElementById`.
fn build_elements_by_id_object(elements: &[HostElement]) -> String {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for element in elements {
        if !seen.insert(element.id.as_str()) {
            continue;
        }
        let attributes = element
            .attributes
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}:{}",
                    js_string_literal(&name.to_ascii_lowercase()),
                    js_string_literal(value)
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        let key = js_string_literal(&element.id);
        entries.push(format!(
            "{key}:{{id:{key},tagName:{},textContent:{},attributes:{{{attributes}}}}}",
            js_string_literal(&element.tag_name),
            js_string_literal(&element.text_content),
        ));
    }
    format!("{{{}}}", entries.join(","))
}

fn js_string_literal(input: &str) -> String {
    format!("{input:?}")
}

#[cfg(test)]
mod tests {
    use super::BoaScriptHost;
    use super::HostElement;
    use super::InlineScript;
    use super::JsRuntimeConfig;
    use super::ScriptHost;

    fn host() -> BoaScriptHost {
        match BoaScriptHost::new(JsRuntimeConfig::default()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn script(source: &str) -> InlineScript {
        InlineScript {
            origin: "inline:test".to_owned(),
            source: source.to_owned(),
        }
    }

    #[test]
    fn globals_persist_between_scripts() {
        let mut host = host();
        assert!(host.execute(&script("window.__x = 1;")).is_ok());
        assert!(host.execute(&script("window.__y = window.__x + 1;")).is_ok());
        assert_eq!(host.eval_string("window.__x === 1 && window.__y"), Ok("2".to_owned()));
        assert_eq!(host.executed(), 2);
    }

    #[test]
    fn script_errors_are_returned_and_leave_the_context_usable() {
        let mut host = host();
        let failed = host.execute(&script("throw new Error('boom');"));
        assert!(matches!(failed, Err(error) if error.code == "js.script_failed"));
        assert!(host.execute(&script("window.__ok = true;")).is_ok());
        assert_eq!(host.eval_string("String(window.__ok)"), Ok("true".to_owned()));
    }

    #[test]
    fn timers_run_after_their_script() {
        let mut host = host();
        assert!(
            host.execute(&script("setTimeout(function () { window.__later = 'done'; }, 0);"))
                .is_ok()
        );
        assert_eq!(host.eval_string("window.__later"), Ok("done".to_owned()));
    }

    #[test]
    fn location_and_title_are_mirrored() {
        let mut host = host();
        assert!(host.set_location("https://example.test/a?\"q\"").is_ok());
        assert!(host.set_document_title("Hello").is_ok());
        assert_eq!(
            host.eval_string("location.href + '|' + document.title"),
            Ok("https://example.test/a?\"q\"|Hello".to_owned())
        );
    }

    #[test]
    fn scripts_find_host_elements_by_id() {
        let mut host = host();
        let elements = [
            HostElement {
                id: "counter".to_owned(),
                tag_name: "SPAN".to_owned(),
                text_content: "3 \"items\"".to_owned(),
                attributes: vec![
                    ("id".to_owned(), "counter".to_owned()),
                    ("DATA-Kind".to_owned(), "cart".to_owned()),
                ],
            },
            HostElement {
                id: "counter".to_owned(),
                tag_name: "DIV".to_owned(),
                text_content: "shadowed".to_owned(),
                attributes: Vec::new(),
            },
        ];
        assert!(host.set_elements(&elements).is_ok());
        assert_eq!(
            host.eval_string(
                "var el = document.getElementById('counter'); \
                 el.tagName + '|' + el.textContent + '|' + el.getAttribute('data-kind')"
            ),
            Ok("SPAN|3 \"items\"|cart".to_owned())
        );
        assert_eq!(
            host.eval_string("document.querySelector('#counter').id"),
            Ok("counter".to_owned())
        );
        assert_eq!(
            host.eval_string("String(document.getElementById('missing'))"),
            Ok("null".to_owned())
        );

        assert!(host.set_elements(&[]).is_ok());
        assert_eq!(
            host.eval_string("String(document.getElementById('counter'))"),
            Ok("null".to_owned())
        );
    }

    #[test]
    fn title_written_by_a_script_can_be_read_back() {
        let mut host = host();
        assert!(host.set_document_title("Before").is_ok());
        assert_eq!(host.document_title(), Some("Before".to_owned()));
        assert!(host.execute(&script("document.title = 'After ' + 1;")).is_ok());
        assert_eq!(host.document_title(), Some("After 1".to_owned()));
    }

    #[test]
    fn oversized_scripts_are_rejected() {
        let mut host = match BoaScriptHost::new(JsRuntimeConfig {
            max_script_bytes: 8,
            ..JsRuntimeConfig::default()
        }) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let result = host.execute(&script("window.__big = 123456;"));
        assert!(matches!(result, Err(error) if error.code == "js.script_too_large"));
    }
}
