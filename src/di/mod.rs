mod container;
mod locator;

pub use container::Container;
pub use locator::ServiceLocator;
