//! Conditional write batches.

use serde::{Deserialize, Serialize};

/// Precondition on the current value of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expect {
	/// No condition.
	Any,
	/// The key must not exist.
	Absent,
	/// The key must hold exactly these bytes.
	Equals(Vec<u8>),
}

impl Expect {
	/// Evaluates the precondition against the current value of the key.
	pub fn holds(&self, current: Option<&[u8]>) -> bool {
		match self {
			Expect::Any => true,
			Expect::Absent => current.is_none(),
			Expect::Equals(expected) => current == Some(expected.as_slice()),
		}
	}
}

/// One step of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
	Put {
		key: String,
		value: Vec<u8>,
		expect: Expect,
	},
	Delete {
		key: String,
		expect: Expect,
	},
	/// Precondition only; nothing is written.
	Check {
		key: String,
		expect: Expect,
	},
}

impl BatchOp {
	pub fn key(&self) -> &str {
		match self {
			BatchOp::Put { key, .. } | BatchOp::Delete { key, .. } | BatchOp::Check { key, .. } => {
				key
			},
		}
	}

	pub fn expect(&self) -> &Expect {
		match self {
			BatchOp::Put { expect, .. }
			| BatchOp::Delete { expect, .. }
			| BatchOp::Check { expect, .. } => expect,
		}
	}
}

/// An ordered list of operations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
	ops: Vec<BatchOp>,
}

impl WriteBatch {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>, expect: Expect) -> &mut Self {
		self.ops.push(BatchOp::Put {
			key: key.into(),
			value,
			expect,
		});
		self
	}

	pub fn delete(&mut self, key: impl Into<String>, expect: Expect) -> &mut Self {
		self.ops.push(BatchOp::Delete {
			key: key.into(),
			expect,
		});
		self
	}

	pub fn check(&mut self, key: impl Into<String>, expect: Expect) -> &mut Self {
		self.ops.push(BatchOp::Check {
			key: key.into(),
			expect,
		});
		self
	}

	pub fn ops(&self) -> &[BatchOp] {
		&self.ops
	}

	pub fn into_ops(self) -> Vec<BatchOp> {
		self.ops
	}

	pub fn len(&self) -> usize {
		self.ops.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_expect_holds() {
		assert!(Expect::Any.holds(None));
		assert!(Expect::Absent.holds(None));
		assert!(!Expect::Absent.holds(Some(b"x")));
		assert!(Expect::Equals(b"x".to_vec()).holds(Some(b"x")));
		assert!(!Expect::Equals(b"x".to_vec()).holds(Some(b"y")));
		assert!(!Expect::Equals(b"x".to_vec()).holds(None));
	}
}
