//! Generic frame stack and the five parallel stacks that make up a scrape
//! cycle's evaluation context. Grounded on
//! `jsonscraper/stack.go` (`Stack[T]`) and `jsonscraper/context.go`
//! (`scraperContext`): reading reduces the stack bottom-to-top, later
//! frames overriding earlier ones for the same key — this *is* the lexical
//! scoping of rule nesting, kept as an explicit stack per the redesign
//! notes rather than collapsed into a single mutable map.

use std::collections::BTreeMap;

use crate::value::Value;

#[derive(Debug, Default)]
pub struct Stack<T> {
    frames: Vec<T>,
}

impl<T> Stack<T> {
    pub fn new() -> Self {
        Stack { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: T) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&T> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut T> {
        self.frames.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Folds all frames bottom-to-top with `reducer`, starting from `init`.
    /// Later frames win ties for the same key — this is the override
    /// semantics described in spec.md §3.
    pub fn reduce<R>(&self, init: R, mut reducer: impl FnMut(R, &T) -> R) -> R {
        let mut acc = init;
        for frame in &self.frames {
            acc = reducer(acc, frame);
        }
        acc
    }
}

pub type AttrMap = BTreeMap<String, Value>;
pub type ParamMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub name: String,
    pub version: String,
}

/// One frame pushed per rule invocation. Only the fields actually written
/// at this rule are populated; reduction merges them against ancestors.
#[derive(Debug, Default)]
pub struct ContextFrame {
    pub document: Option<serde_json::Value>,
    pub resource_attrs: AttrMap,
    pub item_attrs: AttrMap,
    pub parameters: ParamMap,
    pub scope: Option<Scope>,
}

/// The five parallel stacks of spec.md §3: document, resource attributes,
/// item attributes, parameters, scope. `push`/`pop` move all five together
/// so they never drift out of sync with the rule tree's recursion depth.
#[derive(Debug, Default)]
pub struct ScraperContext {
    frames: Stack<ContextFrame>,
}

impl ScraperContext {
    pub fn new() -> Self {
        ScraperContext {
            frames: Stack::new(),
        }
    }

    pub fn push(&mut self) {
        self.frames.push(ContextFrame::default());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn set_document(&mut self, doc: serde_json::Value) {
        if let Some(frame) = self.frames.top_mut() {
            frame.document = Some(doc);
        }
    }

    pub fn current_document(&self) -> Option<&serde_json::Value> {
        for frame in self.frames.frames.iter().rev() {
            if let Some(doc) = &frame.document {
                return Some(doc);
            }
        }
        None
    }

    pub fn add_resource_attr(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.top_mut() {
            frame.resource_attrs.insert(name.into(), value);
        }
    }

    pub fn add_item_attr(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.top_mut() {
            frame.item_attrs.insert(name.into(), value);
        }
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: String) {
        if let Some(frame) = self.frames.top_mut() {
            frame.parameters.insert(name.into(), value);
        }
    }

    pub fn set_scope(&mut self, scope: Scope) {
        if let Some(frame) = self.frames.top_mut() {
            frame.scope = Some(scope);
        }
    }

    pub fn resource_attrs(&self) -> AttrMap {
        self.frames.reduce(AttrMap::new(), |mut acc, frame| {
            acc.extend(frame.resource_attrs.clone());
            acc
        })
    }

    pub fn item_attrs(&self) -> AttrMap {
        self.frames.reduce(AttrMap::new(), |mut acc, frame| {
            acc.extend(frame.item_attrs.clone());
            acc
        })
    }

    pub fn parameters(&self) -> ParamMap {
        self.frames.reduce(ParamMap::new(), |mut acc, frame| {
            acc.extend(frame.parameters.clone());
            acc
        })
    }

    /// Whole-struct override, not per-field merge: the nearest ancestor
    /// frame that set a scope wins outright, matching `getScope`'s `Reduce`
    /// behavior in `context.go`.
    pub fn scope(&self) -> Scope {
        self.frames.reduce(Scope::default(), |acc, frame| match &frame.scope {
            Some(s) => s.clone(),
            None => acc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_frame_overrides_earlier_for_same_key() {
        let mut ctx = ScraperContext::new();
        ctx.push();
        ctx.add_resource_attr("cluster", Value::Str("fab-1".into()));
        ctx.push();
        ctx.add_resource_attr("cluster", Value::Str("fab-2".into()));
        ctx.add_resource_attr("pod", Value::Str("pod-1".into()));

        let attrs = ctx.resource_attrs();
        assert_eq!(attrs.get("cluster"), Some(&Value::Str("fab-2".into())));
        assert_eq!(attrs.get("pod"), Some(&Value::Str("pod-1".into())));

        ctx.pop();
        let attrs = ctx.resource_attrs();
        assert_eq!(attrs.get("cluster"), Some(&Value::Str("fab-1".into())));
        assert_eq!(attrs.get("pod"), None);
    }

    #[test]
    fn scope_override_replaces_whole_struct() {
        let mut ctx = ScraperContext::new();
        ctx.push();
        ctx.set_scope(Scope {
            name: "aci".into(),
            version: "1.0".into(),
        });
        ctx.push();
        assert_eq!(ctx.scope().name, "aci");
    }
}
