//! Database models split into domain-specific modules.

pub mod audit;
pub mod cart;
pub mod category;
pub mod invoice;
pub mod money;
pub mod product;
pub mod report;
pub mod role;
pub mod token;
pub mod user;

pub use audit::*;
pub use cart::*;
pub use category::*;
pub use invoice::*;
pub use money::*;
pub use product::*;
pub use report::{
    CategoryStock, CategoryValue, DateRange, RevenueComparison, RevenueReport, TopSeller,
    TotalStock, UserSales,
};
pub use role::*;
pub use token::*;
pub use user::*;
