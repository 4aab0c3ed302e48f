//! Async interpreter for the compiled IR.
//!
//! One [`Runtime`] executes one template render. It owns the merged data
//! context, the local variable scopes and the exports, and tracks the source
//! offset of the last tag it entered so failures can be located.

use anyhow::{Result, anyhow, bail};
use futures::future::BoxFuture;
use serde_json::Value;

use super::environment::{CompiledTemplate, Environment};
use super::error::TemplateError;
use super::filters::FilterContext;
use super::ir::{BinaryOp, Expr, Node, UnaryOp};
use super::value::{
    Data, add_values, compare_values, is_truthy, number_value, stringify, to_number, type_name,
    values_equal,
};
use crate::constants::{MAX_INCLUDE_DEPTH, MAX_RANGE_ITERATIONS};

type EvalFuture<'a, T> = BoxFuture<'a, Result<T>>;

pub(crate) struct Runtime<'a> {
    env: &'a Environment,
    template: &'a CompiledTemplate,
    data: Data,
    /// Variables assigned with `set`/`export`.
    vars: Data,
    /// Loop variables, innermost last.
    scopes: Vec<Data>,
    exports: Data,
    position: usize,
    depth: usize,
}

impl<'a> Runtime<'a> {
    pub(crate) fn new(
        env: &'a Environment,
        template: &'a CompiledTemplate,
        data: Data,
        depth: usize,
    ) -> Self {
        Self {
            env,
            template,
            data,
            vars: Data::new(),
            scopes: Vec::new(),
            exports: Data::new(),
            position: 0,
            depth,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn into_exports(self) -> Data {
        self.exports
    }

    pub(crate) fn run_nodes<'s>(
        &'s mut self,
        nodes: &'a [Node],
        out: &'s mut String,
    ) -> EvalFuture<'s, ()>
    where
        'a: 's,
    {
        Box::pin(async move {
            for node in nodes {
                self.run_node(node, out).await?;
            }
            Ok(())
        })
    }

    fn run_node<'s>(&'s mut self, node: &'a Node, out: &'s mut String) -> EvalFuture<'s, ()>
    where
        'a: 's,
    {
        Box::pin(async move {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Marker(position) => self.position = *position,
                Node::Output(expr) => {
                    let value = self.eval(expr).await?;
                    out.push_str(&stringify(&value));
                }
                Node::Fragment(nodes) => self.run_nodes(nodes, out).await?,
                Node::If {
                    branches,
                    otherwise,
                } => {
                    for (test, body) in branches {
                        if is_truthy(&self.eval(test).await?) {
                            return self.run_nodes(body, out).await;
                        }
                    }
                    self.run_nodes(otherwise, out).await?;
                }
                Node::For {
                    key,
                    value,
                    iterable,
                    body,
                } => {
                    let iterable = self.eval(iterable).await?;
                    let entries = iterate(iterable)?;
                    self.scopes.push(Data::new());
                    for (entry_key, entry_value) in entries {
                        if let Some(scope) = self.scopes.last_mut() {
                            if let Some(key) = key {
                                scope.insert(key.clone(), entry_key);
                            }
                            scope.insert(value.clone(), entry_value);
                        }
                        self.run_nodes(body, out).await?;
                    }
                    self.scopes.pop();
                }
                Node::Set {
                    name,
                    value,
                    export,
                } => {
                    let value = self.eval(value).await?;
                    if *export {
                        self.exports.insert(name.clone(), value.clone());
                    }
                    self.vars.insert(name.clone(), value);
                }
                Node::Layout {
                    file,
                    data,
                    body,
                } => {
                    let mut content = String::new();
                    self.run_nodes(body, &mut content).await?;
                    let mut extra = match data {
                        Some(data) => self.eval_object(data).await?,
                        None => Data::new(),
                    };
                    extra.insert("content".to_string(), Value::String(content));
                    let file = self.eval_file(file).await?;
                    let rendered = self.render_file(&file, extra).await?;
                    out.push_str(&rendered);
                }
            }
            Ok(())
        })
    }

    fn eval<'s>(&'s mut self, expr: &'a Expr) -> EvalFuture<'s, Value>
    where
        'a: 's,
    {
        Box::pin(async move {
            let value = match expr {
                Expr::Literal(value) => value.clone(),
                Expr::Var(name) => self.lookup(name),
                Expr::Member {
                    object,
                    property,
                    optional,
                } => {
                    let object = self.eval(object).await?;
                    if object.is_null() {
                        if *optional {
                            return Ok(Value::Null);
                        }
                        bail!("Cannot read property '{property}' of undefined");
                    }
                    member(&object, property)
                }
                Expr::Index {
                    object,
                    index,
                    optional,
                } => {
                    let object = self.eval(object).await?;
                    if object.is_null() {
                        if *optional {
                            return Ok(Value::Null);
                        }
                        bail!("Cannot read index of undefined");
                    }
                    let index = self.eval(index).await?;
                    match (&object, &index) {
                        (Value::Array(items), Value::Number(n)) => n
                            .as_u64()
                            .and_then(|i| items.get(i as usize))
                            .cloned()
                            .unwrap_or(Value::Null),
                        (Value::String(text), Value::Number(n)) => n
                            .as_u64()
                            .and_then(|i| text.chars().nth(i as usize))
                            .map(|c| Value::String(c.to_string()))
                            .unwrap_or(Value::Null),
                        _ => member(&object, &stringify(&index)),
                    }
                }
                Expr::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item).await?);
                    }
                    Value::Array(values)
                }
                Expr::Object(entries) => {
                    let mut map = Data::new();
                    for (key, value) in entries {
                        let value = self.eval(value).await?;
                        map.insert(key.clone(), value);
                    }
                    Value::Object(map)
                }
                Expr::Unary {
                    op,
                    operand,
                } => {
                    let operand = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Value::Bool(!is_truthy(&operand)),
                        UnaryOp::Neg => match to_number(&operand) {
                            Some(n) => number_value(-n),
                            None => bail!("Cannot negate {}", type_name(&operand)),
                        },
                    }
                }
                Expr::Binary {
                    op,
                    left,
                    right,
                } => {
                    let left = self.eval(left).await?;
                    match op {
                        BinaryOp::And if !is_truthy(&left) => left,
                        BinaryOp::Or if is_truthy(&left) => left,
                        BinaryOp::Nullish if !left.is_null() => left,
                        BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => self.eval(right).await?,
                        _ => {
                            let right = self.eval(right).await?;
                            binary(*op, &left, &right)?
                        }
                    }
                }
                Expr::Conditional {
                    test,
                    consequent,
                    alternate,
                } => {
                    if is_truthy(&self.eval(test).await?) {
                        self.eval(consequent).await?
                    } else {
                        self.eval(alternate).await?
                    }
                }
                Expr::Filter(call) => {
                    let input = self.eval(&call.input).await?;
                    let mut args = Vec::with_capacity(call.args.len());
                    for arg in &call.args {
                        args.push(self.eval(arg).await?);
                    }
                    let ctx = FilterContext {
                        data: &self.data,
                        env: self.env,
                    };
                    call.filter.apply(&ctx, input, args).await?
                }
                Expr::Include {
                    file,
                    data,
                } => {
                    let extra = match data {
                        Some(data) => self.eval_object(data).await?,
                        None => Data::new(),
                    };
                    let file = self.eval_file(file).await?;
                    Value::String(self.render_file(&file, extra).await?)
                }
                Expr::Capture(nodes) => {
                    let mut content = String::new();
                    self.run_nodes(nodes, &mut content).await?;
                    Value::String(content)
                }
            };
            Ok(value)
        })
    }

    /// Resolve a free identifier: loop variables, assigned variables, the
    /// data variable, then (with implicit data scope) the data context.
    fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            return value.clone();
        }
        if let Some(value) = self.vars.get(name) {
            return value.clone();
        }
        let options = self.env.options();
        if name == options.data_var {
            return Value::Object(self.data.clone());
        }
        if options.auto_data_vars {
            return self.data.get(name).cloned().unwrap_or(Value::Null);
        }
        Value::Null
    }

    async fn eval_object(&mut self, expr: &'a Expr) -> Result<Data> {
        match self.eval(expr).await? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Data::new()),
            other => bail!("Expected an object of data, found {}", type_name(&other)),
        }
    }

    async fn eval_file(&mut self, expr: &'a Expr) -> Result<String> {
        match self.eval(expr).await? {
            Value::String(file) => Ok(file),
            other => bail!("Expected a file name, found {}", type_name(&other)),
        }
    }

    /// Render another template with the current data plus `extra`.
    async fn render_file(&mut self, file: &str, extra: Data) -> Result<String> {
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(TemplateError::IncludeDepth {
                path: file.to_string(),
                depth: MAX_INCLUDE_DEPTH,
            }
            .into());
        }

        let template = self.env.load(file, self.template.path()).await?;
        let mut data = self.data.clone();
        data.extend(extra);
        let result = template.render_at_depth(self.env, data, self.depth + 1).await?;
        Ok(result.content)
    }
}

fn member(object: &Value, property: &str) -> Value {
    match object {
        Value::Object(map) => match map.get(property) {
            Some(value) => value.clone(),
            None if property == "length" => Value::from(map.len()),
            None => Value::Null,
        },
        Value::Array(items) if property == "length" => Value::from(items.len()),
        Value::String(text) if property == "length" => Value::from(text.chars().count()),
        _ => Value::Null,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let arithmetic = |f: fn(f64, f64) -> f64, symbol: &str| -> Result<Value> {
        match (to_number(left), to_number(right)) {
            (Some(a), Some(b)) => Ok(number_value(f(a, b))),
            _ => Err(anyhow!(
                "Cannot apply '{symbol}' to {} and {}",
                type_name(left),
                type_name(right)
            )),
        }
    };

    Ok(match op {
        BinaryOp::Add => add_values(left, right).ok_or_else(|| {
            anyhow!("Cannot apply '+' to {} and {}", type_name(left), type_name(right))
        })?,
        BinaryOp::Sub => arithmetic(|a, b| a - b, "-")?,
        BinaryOp::Mul => arithmetic(|a, b| a * b, "*")?,
        BinaryOp::Div => arithmetic(|a, b| a / b, "/")?,
        BinaryOp::Rem => arithmetic(|a, b| a % b, "%")?,
        BinaryOp::Eq => Value::Bool(values_equal(left, right)),
        BinaryOp::NotEq => Value::Bool(!values_equal(left, right)),
        BinaryOp::Lt => Value::Bool(compare_values(left, right).is_some_and(|o| o.is_lt())),
        BinaryOp::LtEq => Value::Bool(compare_values(left, right).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Value::Bool(compare_values(left, right).is_some_and(|o| o.is_gt())),
        BinaryOp::GtEq => Value::Bool(compare_values(left, right).is_some_and(|o| o.is_ge())),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => right.clone(),
    })
}

/// `(key, value)` pairs a `for` loop walks over.
fn iterate(iterable: Value) -> Result<Vec<(Value, Value)>> {
    Ok(match iterable {
        Value::Null => Vec::new(),
        Value::Array(items) => {
            items.into_iter().enumerate().map(|(i, item)| (Value::from(i), item)).collect()
        }
        Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
        Value::String(text) => text
            .chars()
            .enumerate()
            .map(|(i, c)| (Value::from(i), Value::String(c.to_string())))
            .collect(),
        Value::Number(n) => match n.as_u64() {
            Some(count) if count > MAX_RANGE_ITERATIONS => {
                bail!("Cannot iterate over {count}: ranges are limited to {MAX_RANGE_ITERATIONS} items")
            }
            Some(count) => (1..=count).enumerate().map(|(i, n)| (Value::from(i), Value::from(n))).collect(),
            None => bail!("Cannot iterate over {n}"),
        },
        other => bail!("Cannot iterate over {}", type_name(&other)),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::template::{MemoryLoader, SourceError};
    use serde_json::json;

    fn data(value: Value) -> Data {
        value.as_object().cloned().unwrap_or_default()
    }

    fn render(source: &str, value: Value) -> Result<String> {
        let env = Environment::new(Arc::new(MemoryLoader::new()));
        Ok(env.run_string_sync(source, data(value))?.content)
    }

    #[test]
    fn test_conditionals() {
        let source = "{{ if n > 2 }}big{{ else if n > 0 }}small{{ else }}none{{ /if }}";
        assert_eq!(render(source, json!({"n": 3})).unwrap(), "big");
        assert_eq!(render(source, json!({"n": 1})).unwrap(), "small");
        assert_eq!(render(source, json!({"n": 0})).unwrap(), "none");
    }

    #[test]
    fn test_oversized_range_is_rejected() {
        let err = render("{{ for i of 1000000000000000 }}{{ i }}{{ /for }}", json!({})).unwrap_err();
        assert!(format!("{err:#}").contains("ranges are limited"), "{err:#}");
    }

    #[test]
    fn test_loops_over_arrays_objects_and_ranges() {
        assert_eq!(
            render("{{ for i, x of items }}{{ i }}={{ x }};{{ /for }}", json!({"items": ["a", "b"]}))
                .unwrap(),
            "0=a;1=b;"
        );
        assert_eq!(render("{{ for n of 3 }}{{ n }}{{ /for }}", json!({})).unwrap(), "123");
        assert_eq!(
            render("{{ for k, v of obj }}{{ k }}:{{ v }} {{ /for }}", json!({"obj": {"a": 1}}))
                .unwrap(),
            "a:1 "
        );
        assert_eq!(render("{{ for x of missing }}x{{ /for }}", json!({})).unwrap(), "");
    }

    #[test]
    fn test_set_and_export() {
        let env = Environment::new(Arc::new(MemoryLoader::new()));
        let result = env
            .run_string_sync(
                "{{ set greeting = \"hi\" |> upper }}{{ export total = 1 + 2 }}{{ greeting }} {{ total }}",
                Data::new(),
            )
            .unwrap();
        assert_eq!(result.content, "HI 3");
        assert_eq!(result.exports.get("total"), Some(&json!(3)));
        assert!(result.exports.get("greeting").is_none());
    }

    #[test]
    fn test_block_set_applies_filters_to_body() {
        let output = render("{{ set title |> trim |> upper }}  hello {{ name }} {{ /set }}[{{ title }}]", json!({"name": "you"}))
            .unwrap();
        assert_eq!(output, "[HELLO YOU]");
    }

    #[test]
    fn test_data_variable_and_implicit_scope() {
        assert_eq!(render("{{ it.title }}/{{ title }}", json!({"title": "T"})).unwrap(), "T/T");
        assert_eq!(render("{{ missing }}", json!({})).unwrap(), "");
        assert_eq!(render("{{ missing?.field ?? \"none\" }}", json!({})).unwrap(), "none");
    }

    #[test]
    fn test_runtime_error_points_at_the_failing_line() {
        let err = render("line one\n{{ missing.field }}\nline three", json!({})).unwrap_err();
        let located = err.downcast_ref::<SourceError>().unwrap();
        assert_eq!(located.line, 2);
        assert_eq!(located.code, "{{ missing.field }}");
        assert!(located.message.contains("Cannot read property 'field'"));
    }

    #[test]
    fn test_operators() {
        assert_eq!(render("{{ 7 % 4 }} {{ 10 / 4 }} {{ \"a\" + 1 }}", json!({})).unwrap(), "3 2.5 a1");
        assert_eq!(render("{{ a || \"b\" }}{{ a && \"c\" }}", json!({"a": ""})).unwrap(), "b");
        assert_eq!(render("{{ !flag ? \"yes\" : \"no\" }}", json!({"flag": false})).unwrap(), "yes");
    }

    #[tokio::test]
    async fn test_include_renders_relative_to_includes() {
        let loader = MemoryLoader::new();
        loader.insert("/_includes/item.vto", "<li>{{ label }}</li>");
        let env = Environment::new(Arc::new(loader));
        let result = env
            .run_string("<ul>{{ include \"item.vto\" { label: name } }}</ul>", data(json!({"name": "x"})), None)
            .await
            .unwrap();
        assert_eq!(result.content, "<ul><li>x</li></ul>");
    }

    #[tokio::test]
    async fn test_include_depth_is_bounded() {
        let loader = MemoryLoader::new();
        loader.insert("/_includes/loop.vto", "{{ include \"loop.vto\" }}");
        let env = Environment::new(Arc::new(loader));
        let err = env.run("loop.vto", Data::new(), None).await.unwrap_err();
        let depth_error = err.chain().find_map(|cause| cause.downcast_ref::<TemplateError>());
        assert!(matches!(depth_error, Some(TemplateError::IncludeDepth { .. })), "{err:#}");
    }

    #[tokio::test]
    async fn test_layout_tag_wraps_body() {
        let loader = MemoryLoader::new();
        loader.insert("/_includes/box.vto", "<div class=\"{{ kind }}\">{{ content }}</div>");
        let env = Environment::new(Arc::new(loader));
        let result = env
            .run_string("{{ layout \"box.vto\" { kind: \"note\" } }}Hi {{ name }}{{ /layout }}", data(json!({"name": "A"})), None)
            .await
            .unwrap();
        assert_eq!(result.content, "<div class=\"note\">Hi A</div>");
    }
}
