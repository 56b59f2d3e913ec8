mod article;
mod cve;
mod group;

pub use article::{Document, NewArticle};
pub use cve::{CveDetail, CveRow, NewCveInfo};
pub use group::{
    CategoryGroup, CategoryOverview, DiscoveredSubgroup, Subgroup, SubgroupArticle,
};
