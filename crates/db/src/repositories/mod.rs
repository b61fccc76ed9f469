pub mod stats_repo;

pub use stats_repo::StatsRepo;
