//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable implementation (storage backends, node clients) exposes a
/// `Registry` struct naming the key it is configured under and the factory
/// that builds it.
pub trait ImplementationRegistry {
	/// The name used in configuration files, e.g. "memory" for
	/// `storage.implementations.memory` or "evm_alloy" for
	/// `node.implementations.evm_alloy`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
