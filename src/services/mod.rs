mod cve_lookup;

pub use cve_lookup::{parse_cve_record, CveLookup, MitreCveClient, DEFAULT_CVE_API_URL};
