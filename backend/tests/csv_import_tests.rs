//! CSV import and export tests
//!
//! Uploaded master data goes through `read_csv_rows` and then the row type's
//! conversion into a service input. These tests feed whole files through
//! that path the way the import endpoints do.

use lims_backend::services::csv_io::{export_to_csv, read_csv_rows};
use lims_backend::services::customer::{CustomerCsvRow, CustomerInput};
use lims_backend::services::sample_type::{group_csv_rows, SampleTypeCsvRow};
use lims_backend::services::zoho_sync::zoho_customer_code;
use rust_decimal::Decimal;
use std::str::FromStr;

const CUSTOMERS_CSV: &str = "\
code,name,email,phone,gstin,billing_address,city,state,postal_code,country,notes
 acme01 , Acme Fuels Pvt Ltd ,ops@acme.example,,27aapca1234f1z5,Plot 4 MIDC,Pune,Maharashtra,411019,India,
BLUE,Blue Marine Lubricants,,+91 22 5555 0101,,,Mumbai,,,,Bunker supplier
,Missing Code Ltd,,,,,,,,,
";

const SAMPLE_TYPES_CSV: &str = "\
code,name,description,parameter,method,unit,spec_min,spec_max,sort_order
HSD,High Speed Diesel,BS-VI diesel,Density at 15°C,ASTM D4052,kg/m3,820,860,1
HSD,High Speed Diesel,BS-VI diesel,Flash Point,ASTM D93,°C,35,,2
HSD,High Speed Diesel,BS-VI diesel,Sulphur,ASTM D5453,mg/kg,,10,3
LO,Lube Oil,,Viscosity at 40°C,ASTM D445,cSt,not-a-number,,1
";

#[test]
fn test_customer_rows_are_normalised() {
    let rows = read_csv_rows::<CustomerCsvRow>(CUSTOMERS_CSV.as_bytes()).unwrap();
    assert_eq!(rows.len(), 3);

    let (line, row) = &rows[0];
    assert_eq!(*line, 2);
    let input = CustomerInput::from(row.clone().unwrap());
    assert_eq!(input.code, "ACME01");
    assert_eq!(input.name, "Acme Fuels Pvt Ltd");
    assert_eq!(input.gstin.as_deref(), Some("27AAPCA1234F1Z5"));
    assert_eq!(input.phone, None);
    assert_eq!(input.notes, None);

    let blue = CustomerInput::from(rows[1].1.clone().unwrap());
    assert_eq!(blue.email, None);
    assert_eq!(blue.notes.as_deref(), Some("Bunker supplier"));
}

#[test]
fn test_customer_row_without_code_converts_to_empty_code() {
    let rows = read_csv_rows::<CustomerCsvRow>(CUSTOMERS_CSV.as_bytes()).unwrap();
    let (line, row) = &rows[2];
    assert_eq!(*line, 4);
    // Validation of the code happens in the service and is reported per line
    let input = CustomerInput::from(row.clone().unwrap());
    assert!(input.code.is_empty());
}

#[test]
fn test_customer_export_reads_back() {
    let original: Vec<CustomerCsvRow> = read_csv_rows::<CustomerCsvRow>(CUSTOMERS_CSV.as_bytes())
        .unwrap()
        .into_iter()
        .take(2)
        .map(|(_, row)| row.unwrap())
        .collect();
    let exported = export_to_csv(&original).unwrap();
    assert!(exported.starts_with("code,name,email,phone,gstin"));

    let reread = read_csv_rows::<CustomerCsvRow>(exported.as_bytes()).unwrap();
    assert_eq!(reread.len(), 2);
    let again = reread[1].1.as_ref().unwrap();
    assert_eq!(again.code, "BLUE");
    assert_eq!(again.city.as_deref(), Some("Mumbai"));
}

#[test]
fn test_sample_type_rows_grouped_with_parameters() {
    let rows = read_csv_rows::<SampleTypeCsvRow>(SAMPLE_TYPES_CSV.as_bytes()).unwrap();
    assert_eq!(rows.len(), 4);

    let (ok, failed): (Vec<_>, Vec<_>) = rows.into_iter().partition(|(_, r)| r.is_ok());
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, 5);

    let groups = group_csv_rows(ok.into_iter().map(|(line, r)| (line, r.unwrap())).collect());
    assert_eq!(groups.len(), 1);
    let (first_line, hsd) = &groups["HSD"];
    assert_eq!(*first_line, 2);
    assert_eq!(hsd.parameters.len(), 3);
    assert_eq!(hsd.parameters[0].spec_min, Some(Decimal::from(820)));
    assert_eq!(hsd.parameters[1].spec_max, None);
    assert_eq!(hsd.parameters[2].spec_max, Some(Decimal::from_str("10").unwrap()));
}

#[test]
fn test_header_only_file_has_no_rows() {
    let rows = read_csv_rows::<CustomerCsvRow>(b"code,name\n").unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_zoho_contact_codes() {
    assert_eq!(zoho_customer_code("460000000026049"), "ZH0000026049");
    assert_eq!(zoho_customer_code("abc-12"), "ZHABC12");
}
