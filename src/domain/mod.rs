// Domain layer - Weather plotting models
pub mod selection;
pub mod series;
pub mod station;
pub mod time_range;
pub mod variable;
