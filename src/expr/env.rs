//! `ExpressionEnv`: the runtime each rule expression evaluates against.
//! Grounds `expressions.go`'s `ExpressionEnv` / `EvaluateExpressionWithJqDoc`:
//! a compiled-program cache keyed by source text, a mutex-guarded "current
//! document" binding held for the duration of one evaluation (spec.md §4.2),
//! a `notSeen` duplicates cache, and a reducer accumulator map, plus an
//! optional context DB handle for the `db*` host functions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::context_db::ContextDb;
use crate::context_stack::ScraperContext;
use crate::error::{catch_and_report, EngineError, EngineResult};
use crate::value::Value;

use super::ast::{BinOp, Expr};
use super::functions;
use super::{acipath, grok, parser};

pub struct ExpressionEnv {
    compiled: Mutex<HashMap<String, Arc<Expr>>>,
    /// Sources already known to fail to compile, so a rule that references a
    /// broken expression every cycle logs the failure once rather than
    /// spamming — grounds `expressions.go`'s one-line "skipping known bad
    /// expression" guard.
    known_bad: Mutex<HashSet<String>>,
    seen: Mutex<HashSet<Vec<u8>>>,
    /// Named reducer accumulators, scoped to one scrape cycle in principle
    /// (spec.md §3's Reducer model) but held here on the shared, per-scraper
    /// `ExpressionEnv` (spec.md §5: one expression environment per scraper).
    /// A rule's `reducers:` declaration resets its key via `init_reducer` on
    /// every visit; under the spec's explicitly-permitted overlapping scrape
    /// cycles (§9 open question, kept as-is) two concurrent cycles sharing a
    /// reducer name could observe each other's contributions — accepted,
    /// not reopened, since overlap is the documented default.
    reducers: Mutex<HashMap<String, Vec<Value>>>,
    db: Option<Arc<ContextDb>>,
}

impl ExpressionEnv {
    pub fn new(db: Option<Arc<ContextDb>>) -> Self {
        ExpressionEnv {
            compiled: Mutex::new(HashMap::new()),
            known_bad: Mutex::new(HashSet::new()),
            seen: Mutex::new(HashSet::new()),
            reducers: Mutex::new(HashMap::new()),
            db,
        }
    }

    /// (Re-)initializes a named reducer accumulator to empty, per a rule's
    /// `reducers:` declaration (spec.md §4.3 step f).
    pub fn init_reducer(&self, name: &str) {
        self.reducers.lock().expect("reducer map poisoned").insert(name.to_string(), Vec::new());
    }

    /// Pushes a rule's computed contribution onto a named reducer
    /// accumulator (spec.md §4.3 step h).
    pub fn push_reducer(&self, name: &str, value: Value) {
        self.reducers.lock().expect("reducer map poisoned").entry(name.to_string()).or_default().push(value);
    }

    /// Compiles `src`, caching both the successful program and the fact
    /// that a source string fails to compile.
    pub fn compile(&self, src: &str) -> EngineResult<Arc<Expr>> {
        if let Some(cached) = self.compiled.lock().expect("compile cache poisoned").get(src) {
            return Ok(cached.clone());
        }
        if self.known_bad.lock().expect("bad-compile cache poisoned").contains(src) {
            return Err(EngineError::ExpressionCompile {
                expr: src.to_string(),
                detail: "previously failed to compile".to_string(),
            });
        }
        match parser::parse(src) {
            Ok(expr) => {
                let expr = Arc::new(expr);
                self.compiled
                    .lock()
                    .expect("compile cache poisoned")
                    .insert(src.to_string(), expr.clone());
                Ok(expr)
            }
            Err(e) => {
                self.known_bad.lock().expect("bad-compile cache poisoned").insert(src.to_string());
                Err(e)
            }
        }
    }

    /// Compiles (if needed) and evaluates `src` against `doc`, with `bindings`
    /// supplying the resource/item attribute and parameter lookup chain.
    /// Panics raised from within the evaluator (e.g. a host function bug) are
    /// caught and reported as `PanicDuringEvaluation`, not unwound.
    pub fn evaluate_with_doc(
        &self,
        src: &str,
        doc: &serde_json::Value,
        bindings: &ScraperContext,
    ) -> EngineResult<Value> {
        let expr = self.compile(src)?;
        catch_and_report(std::panic::AssertUnwindSafe(|| self.eval(&expr, doc, bindings)))?
    }

    fn eval(&self, expr: &Expr, doc: &serde_json::Value, bindings: &ScraperContext) -> EngineResult<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => self.lookup_var(name, bindings),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, doc, bindings)?);
                }
                Ok(Value::List(out))
            }
            Expr::Field(base, name) => {
                let v = self.eval(base, doc, bindings)?;
                Ok(v.as_map().ok().and_then(|m| m.get(name)).cloned().unwrap_or(Value::Null))
            }
            Expr::Index(base, idx) => {
                let v = self.eval(base, doc, bindings)?;
                let i = self.eval(idx, doc, bindings)?.as_f64()? as usize;
                Ok(v.as_list().ok().and_then(|l| l.get(i)).cloned().unwrap_or(Value::Null))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, doc, bindings)?.is_truthy())),
            Expr::Neg(inner) => Ok(Value::Float(-self.eval(inner, doc, bindings)?.as_f64()?)),
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, doc, bindings),
            Expr::Call(name, args) => {
                let values = self.eval_all(args, doc, bindings)?;
                self.dispatch(name, None, values, doc)
            }
            Expr::MethodCall(recv, name, args) => {
                let recv_v = self.eval(recv, doc, bindings)?;
                let values = self.eval_all(args, doc, bindings)?;
                self.dispatch(name, Some(recv_v), values, doc)
            }
        }
    }

    fn eval_all(&self, args: &[Expr], doc: &serde_json::Value, bindings: &ScraperContext) -> EngineResult<Vec<Value>> {
        args.iter().map(|a| self.eval(a, doc, bindings)).collect()
    }

    /// Only `attr`, `resAttr`, and `params` are visible in expressions
    /// (spec.md §4.2's built-in variable bindings); any other bare
    /// identifier is an undefined-variable reference.
    fn lookup_var(&self, name: &str, bindings: &ScraperContext) -> EngineResult<Value> {
        match name {
            "attr" => Ok(Value::Map(bindings.item_attrs())),
            "resAttr" => Ok(Value::Map(bindings.resource_attrs())),
            "params" => Ok(Value::string_map(bindings.parameters())),
            other => Err(EngineError::ExpressionCompile {
                expr: other.to_string(),
                detail: format!("undefined variable `{other}`"),
            }),
        }
    }

    fn eval_binary(
        &self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        doc: &serde_json::Value,
        bindings: &ScraperContext,
    ) -> EngineResult<Value> {
        // `&&`/`||` short-circuit, evaluated before touching the rhs.
        if op == BinOp::And {
            let l = self.eval(lhs, doc, bindings)?;
            if !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(self.eval(rhs, doc, bindings)?.is_truthy()));
        }
        if op == BinOp::Or {
            let l = self.eval(lhs, doc, bindings)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(self.eval(rhs, doc, bindings)?.is_truthy()));
        }

        let l = self.eval(lhs, doc, bindings)?;
        let r = self.eval(rhs, doc, bindings)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
            BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
            BinOp::Add if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) => {
                Ok(Value::Str(format!("{l}{r}")))
            }
            BinOp::Add => Ok(Value::Float(l.as_f64()? + r.as_f64()?)),
            BinOp::Sub => Ok(Value::Float(l.as_f64()? - r.as_f64()?)),
            BinOp::Mul => Ok(Value::Float(l.as_f64()? * r.as_f64()?)),
            BinOp::Div => Ok(Value::Float(l.as_f64()? / r.as_f64()?)),
            BinOp::Lt => Ok(Value::Bool(l.as_f64()? < r.as_f64()?)),
            BinOp::Lte => Ok(Value::Bool(l.as_f64()? <= r.as_f64()?)),
            BinOp::Gt => Ok(Value::Bool(l.as_f64()? > r.as_f64()?)),
            BinOp::Gte => Ok(Value::Bool(l.as_f64()? >= r.as_f64()?)),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn dispatch(
        &self,
        name: &str,
        recv: Option<Value>,
        mut args: Vec<Value>,
        doc: &serde_json::Value,
    ) -> EngineResult<Value> {
        // Method-chain form prepends the receiver as the leading argument,
        // so free-call and member-call share one dispatch table, the same
        // way `expressions.go` registers one Go func under two CEL overloads.
        if let Some(r) = recv {
            args.insert(0, r);
        }

        match name {
            "jqs" => {
                let path = args.last().ok_or_else(|| self.arity_err(name))?.as_str()?;
                let target = self.jq_target(&args, doc)?;
                Ok(functions::jqs(&target, path))
            }
            "jqas" => {
                let path = args.last().ok_or_else(|| self.arity_err(name))?.as_str()?;
                let target = self.jq_target(&args, doc)?;
                Ok(functions::jqas(&target, path))
            }
            "hasField" => {
                let path = args.last().ok_or_else(|| self.arity_err(name))?.as_str()?;
                let target = self.jq_target(&args, doc)?;
                Ok(functions::has_field(&target, path))
            }
            "split" => {
                let s = args.first().ok_or_else(|| self.arity_err(name))?.as_str()?;
                let sep = args.get(1).map(|v| v.as_str()).transpose()?.unwrap_or("");
                Ok(functions::split(s, sep))
            }
            "merge" => {
                // merge(list, indices, sep) — receiver form: list.merge(indices, sep)
                let list = args.first().ok_or_else(|| self.arity_err(name))?.as_list()?;
                let indices_arg = args.get(1).ok_or_else(|| self.arity_err(name))?.as_list()?;
                let indices: Vec<i64> = indices_arg.iter().map(|v| v.as_f64().map(|f| f as i64)).collect::<EngineResult<_>>()?;
                let sep = args.get(2).ok_or_else(|| self.arity_err(name))?.as_str()?;
                functions::merge(list, sep, &indices)
            }
            "flatten" => Ok(functions::flatten(args.first().ok_or_else(|| self.arity_err(name))?)),
            "grok" => {
                let text = args.first().ok_or_else(|| self.arity_err(name))?.as_str()?;
                let pattern = args.get(1).ok_or_else(|| self.arity_err(name))?.as_str()?;
                let captures = grok::parse(text, pattern).map_err(|e| EngineError::ExpressionEval {
                    expr: format!("grok({text:?}, {pattern:?})"),
                    detail: e,
                })?;
                Ok(Value::string_map(captures))
            }
            "acipath" => {
                let s = args.first().ok_or_else(|| self.arity_err(name))?.as_str()?;
                let p = acipath::acipath(s).map_err(|e| EngineError::ExpressionEval {
                    expr: format!("acipath({s:?})"),
                    detail: e,
                })?;
                Ok(Value::string_map(
                    [
                        ("path".to_string(), p.path),
                        ("target".to_string(), p.target),
                        ("pod".to_string(), p.pod),
                        ("podId".to_string(), p.pod_id),
                        ("node".to_string(), p.node),
                        ("nodeId".to_string(), p.node_id),
                    ]
                    .into_iter()
                    .collect(),
                ))
            }
            "acipathnodes" => {
                let list = functions::string_list_arg(args.first().ok_or_else(|| self.arity_err(name))?)?;
                Ok(Value::string_list(acipath::acipathnodes(&list)))
            }
            "acipathparse" => {
                let list = functions::string_list_arg(args.first().ok_or_else(|| self.arity_err(name))?)?;
                let parsed = acipath::acipathparse(&list);
                Ok(Value::Map(
                    [
                        ("nodes".to_string(), Value::string_list(parsed.nodes)),
                        ("phyIfs".to_string(), Value::string_list(parsed.phy_ifs)),
                        ("logIfs".to_string(), Value::string_list(parsed.log_ifs)),
                    ]
                    .into_iter()
                    .collect(),
                ))
            }
            "toUnixMillis" => functions::to_unix_millis(args.first().ok_or_else(|| self.arity_err(name))?.as_str()?),
            "fromUnixMillis" => {
                Ok(functions::from_unix_millis(args.first().ok_or_else(|| self.arity_err(name))?.as_f64()? as i64))
            }
            "now" => Ok(functions::now()),
            "notSeen" => {
                let parts = functions::as_string_args(&args)?;
                let key = functions::seen_key(&parts);
                Ok(Value::Bool(self.seen.lock().expect("seen cache poisoned").insert(key)))
            }
            "dbGetFirst" => {
                let (jq_path, table, index, values) = self.db_args(&args)?;
                functions::db_get_first(self.db()?, jq_path, table, index, &values)
            }
            "dbGetFirstA" => {
                let (jq_path, table, index, values) = self.db_args(&args)?;
                functions::db_get_first_a(self.db()?, jq_path, table, index, &values)
            }
            "dbGetAll" => {
                let (jq_path, table, index, values) = self.db_args(&args)?;
                functions::db_get_all(self.db()?, jq_path, table, index, &values)
            }
            "sumReducer" => {
                let list = args.first().ok_or_else(|| self.arity_err(name))?.as_list()?;
                Ok(Value::Float(functions::sum_list(list)?))
            }
            "countReducer" => {
                let list = args.first().ok_or_else(|| self.arity_err(name))?.as_list()?;
                Ok(Value::Int(functions::count_list(list)))
            }
            "avgReducer" => {
                let list = args.first().ok_or_else(|| self.arity_err(name))?.as_list()?;
                Ok(Value::Float(functions::avg_list(list)?))
            }
            "reducerMap" => {
                let key = args.first().ok_or_else(|| self.arity_err(name))?.as_str()?;
                let reducers = self.reducers.lock().expect("reducer map poisoned");
                Ok(Value::List(reducers.get(key).cloned().unwrap_or_default()))
            }
            "print" => {
                let prefix = args.first().ok_or_else(|| self.arity_err(name))?.as_str()?.to_string();
                let value = args.into_iter().nth(1).unwrap_or(Value::Null);
                Ok(functions::print_passthrough(&prefix, value))
            }
            other => Err(EngineError::ExpressionEval {
                expr: other.to_string(),
                detail: "unknown function".to_string(),
            }),
        }
    }

    /// `jqs`/`jqas`/`hasField` accept an optional leading document argument
    /// (the method-chain receiver); with none given they fall back to the
    /// currently bound document, matching `EvaluateExpressionWithJqDoc`'s
    /// implicit `c.JqDoc` binding.
    fn jq_target(&self, args: &[Value], doc: &serde_json::Value) -> EngineResult<serde_json::Value> {
        if args.len() > 1 {
            Ok(args[0].to_json())
        } else {
            Ok(doc.clone())
        }
    }

    /// `dbGetFirst`/`dbGetAll`/`dbGetFirstA` share the shape
    /// `(jqPath, table, index, fields...)`.
    fn db_args<'a>(&self, args: &'a [Value]) -> EngineResult<(&'a str, &'a str, &'a str, Vec<String>)> {
        let jq_path = args.first().ok_or_else(|| self.arity_err("db"))?.as_str()?;
        let table = args.get(1).ok_or_else(|| self.arity_err("db"))?.as_str()?;
        let index = args.get(2).ok_or_else(|| self.arity_err("db"))?.as_str()?;
        let values = args[3..].iter().map(|v| Ok(v.as_str()?.to_string())).collect::<EngineResult<_>>()?;
        Ok((jq_path, table, index, values))
    }

    fn db(&self) -> EngineResult<&ContextDb> {
        self.db
            .as_deref()
            .ok_or_else(|| EngineError::ContextDb("no context db configured for this scrape target".to_string()))
    }

    fn arity_err(&self, fn_name: &str) -> EngineError {
        EngineError::ExpressionEval {
            expr: fn_name.to_string(),
            detail: "wrong number of arguments".to_string(),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_jqs_against_bound_document() {
        let env = ExpressionEnv::new(None);
        let doc = json!({"attributes": {"name": "eth1/1"}});
        let bindings = ScraperContext::new();
        let got = env.evaluate_with_doc("jqs('./attributes/name')", &doc, &bindings).unwrap();
        assert_eq!(got, Value::Str("eth1/1".into()));
    }

    #[test]
    fn not_seen_is_true_only_once_per_key() {
        let env = ExpressionEnv::new(None);
        let doc = json!({});
        let bindings = ScraperContext::new();
        let first = env.evaluate_with_doc("notSeen('a', 'b')", &doc, &bindings).unwrap();
        let second = env.evaluate_with_doc("notSeen('a', 'b')", &doc, &bindings).unwrap();
        assert_eq!(first, Value::Bool(true));
        assert_eq!(second, Value::Bool(false));
    }

    #[test]
    fn reducer_map_accumulates_contributions_then_sums() {
        let env = ExpressionEnv::new(None);
        let doc = json!({});
        let bindings = ScraperContext::new();
        env.init_reducer("k");
        env.push_reducer("k", Value::Int(1));
        env.push_reducer("k", Value::Int(2));
        let got = env.evaluate_with_doc("sumReducer(reducerMap('k'))", &doc, &bindings).unwrap();
        assert_eq!(got, Value::Float(3.0));
    }

    #[test]
    fn unknown_function_is_an_eval_error_not_panic() {
        let env = ExpressionEnv::new(None);
        let doc = json!({});
        let bindings = ScraperContext::new();
        assert!(env.evaluate_with_doc("notAFunction()", &doc, &bindings).is_err());
    }
}
