//! Request routing: complexity classification and the ordered decision table
//!
//! Both halves are pure. The classifier maps a request to a
//! [`ComplexityTier`]; the dispatcher walks a [`RoutingTable`] top-down and
//! returns the first matching [`RoutingDecision`].

mod classifier;
mod table;

pub use classifier::{classify, ComplexityTier};
pub use table::{
    FusionSubtype, Route, RoutingDecision, RoutingDispatcher, RoutingRule, RoutingTable,
    ETHICAL_KEYWORDS,
};
