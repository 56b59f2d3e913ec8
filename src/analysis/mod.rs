pub mod categories;
pub mod chunker;
pub mod companies;
pub mod cve;
mod prompt;
pub mod subgroups;

pub use categories::{
    assign_categories, run_category_assignment, save_category_assignments, CategoryAssignments,
    CategoryRunReport, Taxonomy,
};
pub use chunker::{approximate_tokens, chunk_documents};
pub use companies::run_company_extraction;
pub use cve::{extract_cve_ids, process_cve_mentions, refresh_cve_details};
pub use subgroups::{discover_subgroups, run_subgroup_discovery, SubgroupRunReport};
