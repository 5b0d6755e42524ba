//! Identity domain shared by the storage layer and the application shell:
//! roles, accounts, the credential policy and the startup seeder.

pub mod policy;
pub mod seed;
pub mod seeder;
pub mod store;
pub mod types;

pub use seed::{SeedAccount, SeedPlan};
pub use seeder::{SeedError, SeedOptions, SeedReport, Seeder};
pub use store::{AccountStore, AssignmentService, RoleStore, StoreError};
