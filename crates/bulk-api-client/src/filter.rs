//! Filter expressions for queries and listings.
//!
//! A [`Q`] is a tree of `and` / `or` / `not` nodes over `field = value`
//! predicates. Combining with an empty expression is the identity, and
//! combining two trees under the connector they already use flattens them
//! into a single node:
//!
//! ```rust
//! use bulk_api_client::Q;
//!
//! let q = Q::field("text", "a") & Q::field("integer", 5) & Q::field("id", 1);
//! assert_eq!(
//!     q.output_filter(),
//!     serde_json::json!({"and": [{"text": "a"}, {"integer": 5}, {"id": 1}]}),
//! );
//! ```

use serde_json::{Map, Value};
use std::ops::{BitAnd, BitOr, Not};

/// Connector joining the children of a [`Q`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// All children must hold.
    And,
    /// At least one child must hold.
    Or,
    /// The single child must not hold.
    Not,
}

impl Connector {
    /// Wire name of the connector.
    pub fn as_str(&self) -> &'static str {
        match self {
            Connector::And => "and",
            Connector::Or => "or",
            Connector::Not => "not",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Predicate(String, Value),
    Tree(Q),
}

/// Filter expression builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Q {
    connector: Connector,
    children: Vec<Node>,
}

impl Default for Q {
    fn default() -> Self {
        Self::new()
    }
}

impl Q {
    /// An empty expression (matches everything).
    pub fn new() -> Self {
        Self {
            connector: Connector::And,
            children: Vec::new(),
        }
    }

    /// A single `field = value` predicate.
    pub fn field(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::from_pairs([(name.into(), value.into())])
    }

    /// Predicates joined by `and`, in the given order.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            connector: Connector::And,
            children: pairs
                .into_iter()
                .map(|(k, v)| Node::Predicate(k.into(), v.into()))
                .collect(),
        }
    }

    /// True if the expression holds no predicates.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Top-level connector.
    pub fn connector(&self) -> Connector {
        self.connector
    }

    /// Combine under `and`.
    pub fn and(self, other: Q) -> Q {
        self.combine(other, Connector::And)
    }

    /// Combine under `or`.
    pub fn or(self, other: Q) -> Q {
        self.combine(other, Connector::Or)
    }

    /// Wrap as a single-child negation. Negating an empty expression is a no-op.
    ///
    /// A lone predicate is negated directly, without its `and` wrapper.
    pub fn negate(self) -> Q {
        if self.is_empty() {
            return self;
        }
        let children = if self.connector != Connector::Not && self.children.len() == 1 {
            self.children
        } else {
            vec![Node::Tree(self)]
        };
        Q {
            connector: Connector::Not,
            children,
        }
    }

    fn combine(self, other: Q, connector: Connector) -> Q {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }

        let mut combined = Q {
            connector,
            children: Vec::new(),
        };
        for operand in [self, other] {
            // A one-predicate node carries no connector semantics of its own,
            // except a negation which must stay wrapped.
            let absorb = operand.connector != Connector::Not
                && (operand.connector == connector || operand.children.len() == 1);
            if absorb {
                combined.children.extend(operand.children);
            } else {
                combined.children.push(Node::Tree(operand));
            }
        }
        combined
    }

    /// Serialize to the nested `{connector: [operand, ...]}` mapping.
    pub fn output_filter(&self) -> Value {
        let operands = self
            .children
            .iter()
            .map(|child| match child {
                Node::Predicate(k, v) => {
                    let mut leaf = Map::new();
                    leaf.insert(k.clone(), v.clone());
                    Value::Object(leaf)
                }
                Node::Tree(q) => q.output_filter(),
            })
            .collect();
        let mut out = Map::new();
        out.insert(self.connector.as_str().to_string(), Value::Array(operands));
        Value::Object(out)
    }
}

impl BitAnd for Q {
    type Output = Q;

    fn bitand(self, rhs: Q) -> Q {
        self.and(rhs)
    }
}

impl BitOr for Q {
    type Output = Q;

    fn bitor(self, rhs: Q) -> Q {
        self.or(rhs)
    }
}

impl Not for Q {
    type Output = Q;

    fn not(self) -> Q {
        self.negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_predicate() {
        assert_eq!(Q::field("a", 1).output_filter(), json!({"and": [{"a": 1}]}));
    }

    #[test]
    fn test_pairs_keep_order() {
        let q = Q::from_pairs([("b", json!(2)), ("a", json!(1))]);
        assert_eq!(q.output_filter(), json!({"and": [{"b": 2}, {"a": 1}]}));
    }

    #[test]
    fn test_empty_is_identity() {
        let a = Q::field("a", 1) | Q::field("b", 2);
        assert_eq!(a.clone() & Q::new(), a);
        assert_eq!(Q::new() & a.clone(), a);
        assert_eq!(a.clone() | Q::new(), a);
        assert_eq!(Q::new() | a.clone(), a);
        assert!((Q::new() & Q::new()).is_empty());
    }

    #[test]
    fn test_and_is_associative_flattening() {
        let a = || Q::field("a", 1);
        let b = || Q::field("b", 2);
        let c = || Q::field("c", 3);

        let left = (a() & b()) & c();
        let right = a() & (b() & c());
        let expected = json!({"and": [{"a": 1}, {"b": 2}, {"c": 3}]});

        assert_eq!(left.output_filter(), expected);
        assert_eq!(right.output_filter(), expected);
    }

    #[test]
    fn test_or_of_singletons_flattens() {
        let q = Q::field("a", 1) | Q::field("b", 2) | Q::field("c", 3);
        assert_eq!(
            q.output_filter(),
            json!({"or": [{"a": 1}, {"b": 2}, {"c": 3}]})
        );
    }

    #[test]
    fn test_mixed_connectors_nest() {
        let q = (Q::field("a", 1) | Q::field("b", 2)) & Q::from_pairs([("c", 3), ("d", 4)]);
        assert_eq!(
            q.output_filter(),
            json!({"and": [{"or": [{"a": 1}, {"b": 2}]}, {"c": 3}, {"d": 4}]})
        );
    }

    #[test]
    fn test_not_wraps_single_child() {
        let q = !(Q::field("a", 1) | Q::field("b", 2));
        assert_eq!(q.connector(), Connector::Not);
        assert_eq!(
            q.output_filter(),
            json!({"not": [{"or": [{"a": 1}, {"b": 2}]}]})
        );
    }

    #[test]
    fn test_not_of_single_predicate_holds_the_leaf() {
        assert_eq!(
            (!Q::field("field1", 1)).output_filter(),
            json!({"not": [{"field1": 1}]})
        );
        assert_eq!(
            (!Q::from_pairs([("field2", 2), ("field3", 3)])).output_filter(),
            json!({"not": [{"and": [{"field2": 2}, {"field3": 3}]}]})
        );
    }

    #[test]
    fn test_not_stays_wrapped_when_combined() {
        let q3 = !Q::field("field1", 1) & Q::field("field2", 2);
        assert_eq!(
            q3.output_filter(),
            json!({"and": [{"not": [{"field1": 1}]}, {"field2": 2}]})
        );

        let q4 = Q::field("field1", 1) | !Q::field("field2", 2);
        assert_eq!(
            q4.output_filter(),
            json!({"or": [{"field1": 1}, {"not": [{"field2": 2}]}]})
        );

        let q5 = Q::field("field1", 1) & !Q::field("field2", 2) & Q::field("field3", 3);
        assert_eq!(
            q5.output_filter(),
            json!({"and": [{"field1": 1}, {"not": [{"field2": 2}]}, {"field3": 3}]})
        );

        let q6 = (Q::field("field1", 1) & !Q::field("field2", 2)) | Q::field("field3", 3);
        assert_eq!(
            q6.output_filter(),
            json!({"or": [
                {"and": [{"field1": 1}, {"not": [{"field2": 2}]}]},
                {"field3": 3}
            ]})
        );

        let q7 = !Q::field("field1", 1) & !Q::field("field2", 2);
        assert_eq!(
            q7.output_filter(),
            json!({"and": [{"not": [{"field1": 1}]}, {"not": [{"field2": 2}]}]})
        );
    }

    #[test]
    fn test_double_negation_nests() {
        assert_eq!(
            (!!Q::field("a", 1)).output_filter(),
            json!({"not": [{"not": [{"a": 1}]}]})
        );
    }

    #[test]
    fn test_not_of_empty_is_empty() {
        assert!((!Q::new()).is_empty());
    }
}
