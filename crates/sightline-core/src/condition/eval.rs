//! Tree-walking evaluator over a closed [`EventContext`].

use std::cmp::Ordering;

use super::parser::{BinOp, Builtin, CmpOp, Expr, Method, Variable};
use super::value::Value;
use super::{ConditionError, EventContext};

/// Upper bound on nodes visited in one evaluation.
pub const MAX_STEPS: usize = 10_000;

pub(super) struct Evaluator<'a> {
    ctx: &'a EventContext,
    steps: usize,
}

type EvalResult = Result<Value, ConditionError>;

fn fail(message: impl Into<String>) -> ConditionError {
    ConditionError::Eval(message.into())
}

impl<'a> Evaluator<'a> {
    pub(super) fn new(ctx: &'a EventContext) -> Self {
        Self { ctx, steps: 0 }
    }

    pub(super) fn eval(&mut self, expr: &Expr) -> EvalResult {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(fail("step budget exhausted"));
        }
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(var) => Ok(self.variable(*var)),
            Expr::List(items) => {
                let values = items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?;
                Ok(Value::List(values))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.truthy())),
            Expr::And(left, right) => {
                let lhs = self.eval(left)?;
                if lhs.truthy() { self.eval(right) } else { Ok(lhs) }
            }
            Expr::Or(left, right) => {
                let lhs = self.eval(left)?;
                if lhs.truthy() { Ok(lhs) } else { self.eval(right) }
            }
            Expr::Compare { first, rest } => {
                let mut lhs = self.eval(first)?;
                for (op, rhs_expr) in rest {
                    let rhs = self.eval(rhs_expr)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::Binary { op, left, right } => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                arithmetic(*op, lhs, rhs)
            }
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| fail("integer overflow")),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(fail(format!("bad operand type for unary -: '{}'", other.type_name()))),
            },
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                subscript(&target, &index)
            }
            Expr::Attr { target, name } => match self.eval(target)? {
                Value::Map(map) => map
                    .get(name)
                    .map(Value::from_json)
                    .ok_or_else(|| fail(format!("no key '{name}'"))),
                other => Err(fail(format!("'{}' has no attribute '{name}'", other.type_name()))),
            },
            Expr::MethodCall { target, method, args } => {
                let receiver = self.eval(target)?;
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                call_method(*method, &receiver, args)
            }
            Expr::Call { func, args } => {
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                call_builtin(*func, args.into_iter().next())
            }
        }
    }

    fn variable(&self, var: Variable) -> Value {
        match var {
            Variable::Payload => Value::Map(self.ctx.payload.clone()),
            Variable::Message => Value::Str(self.ctx.message.clone()),
            Variable::Severity => Value::Str(self.ctx.severity.as_str().to_string()),
            Variable::Timestamp => {
                #[allow(clippy::cast_precision_loss)]
                let micros = self.ctx.timestamp.timestamp_micros() as f64;
                Value::Float(micros / 1_000_000.0)
            }
            Variable::EventType => Value::Str(self.ctx.event_type.as_str().to_string()),
            Variable::SourceModule => Value::Str(self.ctx.source_module.clone()),
        }
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ConditionError> {
    let ordered = |pred: fn(Ordering) -> bool| {
        lhs.partial_order(rhs).map(pred).ok_or_else(|| {
            fail(format!(
                "cannot order '{}' and '{}'",
                lhs.type_name(),
                rhs.type_name()
            ))
        })
    };
    match op {
        CmpOp::Eq => Ok(lhs.loose_eq(rhs)),
        CmpOp::Ne => Ok(!lhs.loose_eq(rhs)),
        CmpOp::Lt => ordered(Ordering::is_lt),
        CmpOp::Le => ordered(Ordering::is_le),
        CmpOp::Gt => ordered(Ordering::is_gt),
        CmpOp::Ge => ordered(Ordering::is_ge),
        CmpOp::In => contains(rhs, lhs),
        CmpOp::NotIn => contains(rhs, lhs).map(|found| !found),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, ConditionError> {
    match (container, item) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::List(items), _) => Ok(items.iter().any(|v| v.loose_eq(item))),
        (Value::Map(map), Value::Str(key)) => Ok(map.contains_key(key)),
        _ => Err(fail(format!(
            "'in' not supported between '{}' and '{}'",
            item.type_name(),
            container.type_name()
        ))),
    }
}

fn arithmetic(op: BinOp, lhs: Value, rhs: Value) -> EvalResult {
    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (BinOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (op, Value::Int(a), Value::Int(b)) => int_arithmetic(op, a, b),
        (op, lhs, rhs) => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return Err(fail(format!(
                    "unsupported operand types: '{}' and '{}'",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            };
            float_arithmetic(op, a, b)
        }
    }
}

fn int_arithmetic(op: BinOp, a: i64, b: i64) -> EvalResult {
    let overflow = || fail("integer overflow");
    match op {
        BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        #[allow(clippy::cast_precision_loss)]
        BinOp::Div => float_arithmetic(op, a as f64, b as f64),
        BinOp::Mod => {
            if b == 0 {
                return Err(fail("modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
    }
}

fn float_arithmetic(op: BinOp, a: f64, b: f64) -> EvalResult {
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div if b == 0.0 => Err(fail("division by zero")),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::Mod if b == 0.0 => Err(fail("modulo by zero")),
        BinOp::Mod => {
            let r = a % b;
            Ok(Value::Float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }))
        }
    }
}

fn subscript(target: &Value, index: &Value) -> EvalResult {
    match (target, index) {
        (Value::Map(map), Value::Str(key)) => map
            .get(key)
            .map(Value::from_json)
            .ok_or_else(|| fail(format!("no key '{key}'"))),
        (Value::List(items), Value::Int(i)) => position(items.len(), *i)
            .map(|p| items[p].clone())
            .ok_or_else(|| fail("list index out of range")),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            position(chars.len(), *i)
                .map(|p| Value::Str(chars[p].to_string()))
                .ok_or_else(|| fail("string index out of range"))
        }
        _ => Err(fail(format!(
            "'{}' is not subscriptable by '{}'",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn position(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) { usize::try_from(resolved).ok() } else { None }
}

fn call_method(method: Method, receiver: &Value, args: Vec<Value>) -> EvalResult {
    let mut args = args.into_iter();
    match (method, receiver) {
        (Method::Get, Value::Map(map)) => {
            let key = args.next().unwrap_or(Value::None);
            let default = args.next().unwrap_or(Value::None);
            let Value::Str(key) = key else {
                return Ok(default);
            };
            Ok(map.get(&key).map_or(default, Value::from_json))
        }
        (Method::Lower, Value::Str(s)) => Ok(Value::Str(s.to_lowercase())),
        (Method::Upper, Value::Str(s)) => Ok(Value::Str(s.to_uppercase())),
        (Method::StartsWith | Method::EndsWith, Value::Str(s)) => {
            let Some(Value::Str(affix)) = args.next() else {
                return Err(fail("startswith/endswith expects a string"));
            };
            Ok(Value::Bool(if method == Method::StartsWith {
                s.starts_with(affix.as_str())
            } else {
                s.ends_with(affix.as_str())
            }))
        }
        (method, other) => Err(fail(format!(
            "'{}' has no method {method:?}",
            other.type_name()
        ))),
    }
}

fn call_builtin(func: Builtin, arg: Option<Value>) -> EvalResult {
    match func {
        Builtin::Len => match arg {
            Some(Value::Str(s)) => Ok(Value::Int(len_i64(s.chars().count()))),
            Some(Value::List(items)) => Ok(Value::Int(len_i64(items.len()))),
            Some(Value::Map(map)) => Ok(Value::Int(len_i64(map.len()))),
            Some(other) => Err(fail(format!("object of type '{}' has no len()", other.type_name()))),
            None => Err(fail("len() takes exactly one argument")),
        },
        Builtin::Str => Ok(Value::Str(arg.map(|v| v.render()).unwrap_or_default())),
        Builtin::Bool => Ok(Value::Bool(arg.is_some_and(|v| v.truthy()))),
        Builtin::Int => match arg {
            None => Ok(Value::Int(0)),
            Some(Value::Int(n)) => Ok(Value::Int(n)),
            Some(Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
            Some(Value::Float(f)) => {
                if f.is_finite() && f.trunc().abs() < 9.2e18 {
                    #[allow(clippy::cast_possible_truncation)]
                    Ok(Value::Int(f.trunc() as i64))
                } else {
                    Err(fail("cannot convert float to int"))
                }
            }
            Some(Value::Str(s)) => s
                .trim()
                .replace('_', "")
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| fail(format!("invalid literal for int(): '{s}'"))),
            Some(other) => Err(fail(format!("int() argument must not be '{}'", other.type_name()))),
        },
        Builtin::Float => match arg {
            None => Ok(Value::Float(0.0)),
            Some(Value::Bool(b)) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
            Some(Value::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| fail(format!("could not convert string to float: '{s}'"))),
            Some(other) => other
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| fail(format!("float() argument must not be '{}'", other.type_name()))),
        },
    }
}

fn len_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
