pub mod position_aggregator;
