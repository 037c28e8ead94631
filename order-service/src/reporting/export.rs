use num_traits::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use shared::locale;
use std::str::FromStr;
use thiserror::Error;

use super::Report;

const REPORT_TITLE: &str = "BÁO CÁO DOANH THU VÀ ĐƠN HÀNG";
const FILE_STEM: &str = "bao-cao-doanh-thu";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("spreadsheet export failed: {0}")]
    Xlsx(#[from] XlsxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Typst,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Typst => "typ",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Typst => "text/plain; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xlsx" => Ok(ExportFormat::Xlsx),
            "typst" | "typ" => Ok(ExportFormat::Typst),
            other => Err(format!("unsupported export format: {}", other)),
        }
    }
}

pub fn file_name(report: &Report, format: ExportFormat) -> String {
    format!(
        "{}-{}.{}",
        FILE_STEM,
        locale::file_date(report.generated_on),
        format.extension()
    )
}

pub fn render(report: &Report, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Xlsx => to_xlsx(report),
        ExportFormat::Typst => Ok(to_typst(report).into_bytes()),
    }
}

fn write_header(sheet: &mut Worksheet, headers: &[&str], bold: &Format) -> Result<(), XlsxError> {
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, bold)?;
        sheet.set_column_width(col as u16, 24)?;
    }
    Ok(())
}

pub fn to_xlsx(report: &Report) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    let stats = &report.stats;
    let sheet = workbook.add_worksheet();
    sheet.set_name("Thống Kê")?;
    write_header(sheet, &["Chỉ số", "Giá trị"], &bold)?;
    sheet.write_string(1, 0, "Tổng Doanh Thu")?;
    sheet.write_string(1, 1, locale::format_vnd(&stats.total_revenue))?;
    for (row, (label, value)) in [
        ("Tổng Đơn Hàng", stats.total_orders),
        ("Đơn Đang Chờ", stats.pending_orders),
        ("Đơn Hoàn Thành", stats.completed_orders),
    ]
    .into_iter()
    .enumerate()
    {
        let row = row as u32 + 2;
        sheet.write_string(row, 0, label)?;
        sheet.write_number(row, 1, value as f64)?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Doanh Thu Theo Ngày")?;
    write_header(sheet, &["Ngày", "Doanh Thu (đ)"], &bold)?;
    for (i, day) in report.revenue_by_day.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &day.date)?;
        sheet.write_number(row, 1, day.revenue.to_f64().unwrap_or_default())?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Sản Phẩm Bán Chạy")?;
    write_header(sheet, &["Sản Phẩm", "Số Lượng Bán", "Doanh Thu (đ)"], &bold)?;
    for (i, product) in report.best_sellers.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &product.name)?;
        sheet.write_number(row, 1, product.total_sold as f64)?;
        sheet.write_number(row, 2, product.revenue.to_f64().unwrap_or_default())?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Trạng Thái Đơn Hàng")?;
    write_header(sheet, &["Trạng Thái", "Số Lượng"], &bold)?;
    for (i, status) in report.orders_by_status.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &status.label)?;
        sheet.write_number(row, 1, status.count as f64)?;
    }

    Ok(workbook.save_to_buffer()?)
}

/// Quotes a value as a Typst string literal.
fn typst_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn push_table(output: &mut String, title: &str, headers: &[&str], rows: &[Vec<String>]) {
    output.push_str(&format!("\n== {}\n\n", title));
    output.push_str(&format!("#table(\n  columns: {},\n", headers.len()));

    let header: Vec<String> = headers.iter().map(|h| typst_str(h)).collect();
    output.push_str(&format!("  table.header({}),\n", header.join(", ")));

    for row in rows {
        let cells: Vec<String> = row.iter().map(|cell| typst_str(cell)).collect();
        output.push_str(&format!("  {},\n", cells.join(", ")));
    }
    output.push_str(")\n");
}

/// Renders the report as a Typst document; `typst compile` turns it into a PDF.
pub fn to_typst(report: &Report) -> String {
    let mut output = String::new();
    output.push_str("#set page(paper: \"a4\", margin: 2cm)\n");
    output.push_str("#set text(lang: \"vi\", size: 11pt)\n\n");
    output.push_str(&format!("= {}\n\n", REPORT_TITLE));
    output.push_str(&format!(
        "Ngày xuất: {}\n",
        locale::format_date(report.generated_on)
    ));

    let stats = &report.stats;
    push_table(
        &mut output,
        "Thống Kê Tổng Quan",
        &["Chỉ số", "Giá trị"],
        &[
            vec!["Tổng Doanh Thu".to_string(), locale::format_vnd(&stats.total_revenue)],
            vec!["Tổng Đơn Hàng".to_string(), stats.total_orders.to_string()],
            vec!["Đơn Đang Chờ".to_string(), stats.pending_orders.to_string()],
            vec!["Đơn Hoàn Thành".to_string(), stats.completed_orders.to_string()],
        ],
    );

    let days: Vec<Vec<String>> = report
        .revenue_by_day
        .iter()
        .map(|day| vec![day.date.clone(), locale::format_number(&day.revenue)])
        .collect();
    push_table(
        &mut output,
        "Doanh Thu 7 Ngày Gần Nhất",
        &["Ngày", "Doanh Thu (đ)"],
        &days,
    );

    let products: Vec<Vec<String>> = report
        .best_sellers
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.total_sold.to_string(),
                locale::format_number(&p.revenue),
            ]
        })
        .collect();
    push_table(
        &mut output,
        "Top 5 Sản Phẩm Bán Chạy",
        &["Sản Phẩm", "Số Lượng", "Doanh Thu (đ)"],
        &products,
    );

    let statuses: Vec<Vec<String>> = report
        .orders_by_status
        .iter()
        .map(|s| vec![s.label.clone(), s.count.to_string()])
        .collect();
    push_table(
        &mut output,
        "Trạng Thái Đơn Hàng",
        &["Trạng Thái", "Số Lượng"],
        &statuses,
    );

    output
}
