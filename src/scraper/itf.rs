//! Extractor for the ITF billing portal (electricity, gas and water).
//!
//! All selectors and the Armenian field labels of the result cards live in
//! this module.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::models::job::{ExtractedFields, Utility};
use crate::scraper::browser::BrowserError;
use crate::scraper::extractor::{ExtractContext, ExtractError, Extractor};

pub const SITE_KEY: &str = "itf";

/// Any of these showing up after submit means the account does not exist.
const NOT_FOUND_SELECTORS: [&str; 3] = [
    "#message.alert-danger",
    "#message.alert.alert-danger",
    "#message.alert-danger.alert-dismissible",
];

const SEARCH_BUTTON: &str = r#"[class="btn btn-success"]"#;
const CITY_DROPDOWN: &str = r#"[class="select2-selection__rendered"]"#;
const CITY_SEARCH: &str = "input.select2-search__field";
const CITY_OPTION: &str = "li.select2-results__option.select2-results__option--highlighted";

const FIELD_BLOCK: &str = "div.col-md-4";
const FIELD_LABEL: &str = "p.text-black";
const FIELD_VALUE: &str = "h6.hint-text";

const WATER_RESULTS_TIMEOUT: Duration = Duration::from_millis(6000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Address,
    Consumption,
    DebitConsumption,
    DebitService,
    DebitFull,
}

impl Field {
    fn set(self, fields: &mut ExtractedFields, value: String) {
        let slot = match self {
            Field::Address => &mut fields.address,
            Field::Consumption => &mut fields.consumption,
            Field::DebitConsumption => &mut fields.debit_consumption,
            Field::DebitService => &mut fields.debit_service,
            Field::DebitFull => &mut fields.debit_full,
        };
        *slot = Some(value);
    }
}

const ELECTRICITY_LABELS: &[(&str, Field)] = &[
    ("Հասցե", Field::Address),
    ("էլ. էներգիայի ծախսը", Field::Consumption),
    ("Ենթակա է վճարման", Field::DebitFull),
];

const GAS_LABELS: &[(&str, Field)] = &[
    ("Հասցե", Field::Address),
    ("Ծախս", Field::Consumption),
    ("Սպառողական պարտք", Field::DebitConsumption),
    ("Սպասարկման պարտք", Field::DebitService),
    ("Պարտք", Field::DebitFull),
];

const WATER_LABELS: &[(&str, Field)] = &[
    ("Հասցե", Field::Address),
    ("Սպառում", Field::Consumption),
    ("Պարտք", Field::DebitFull),
];

/// Per-utility form and result card layout.
struct FormLayout {
    account_input: &'static str,
    result_panel: &'static str,
    labels: &'static [(&'static str, Field)],
    select_city: bool,
    /// The gas panel is always in the DOM and only unhidden on success.
    hidden_until_loaded: bool,
    results_timeout: Option<Duration>,
}

fn layout(utility: Utility) -> Option<FormLayout> {
    match utility {
        Utility::Electricity => Some(FormLayout {
            account_input: r#"[name="customer_id"]"#,
            result_panel: "#resultcard",
            labels: ELECTRICITY_LABELS,
            select_city: false,
            hidden_until_loaded: false,
            results_timeout: None,
        }),
        Utility::Gas => Some(FormLayout {
            account_input: r#"[name="customer_id"]"#,
            result_panel: "#resultcard",
            labels: GAS_LABELS,
            select_city: true,
            hidden_until_loaded: true,
            results_timeout: None,
        }),
        Utility::Water => Some(FormLayout {
            account_input: r#"[name="agreement_number"]"#,
            result_panel: "#result",
            labels: WATER_LABELS,
            select_city: false,
            hidden_until_loaded: false,
            results_timeout: Some(WATER_RESULTS_TIMEOUT),
        }),
        _ => None,
    }
}

/// A form element the extractor needs is missing: the page is not the one
/// expected.
fn element_missing(e: BrowserError) -> ExtractError {
    match e {
        BrowserError::Element { selector, .. } => ExtractError::SelectorNotFound(selector),
        other => ExtractError::Browser(other),
    }
}

pub struct ItfExtractor;

#[async_trait]
impl Extractor for ItfExtractor {
    fn name(&self) -> &'static str {
        SITE_KEY
    }

    async fn extract(&self, ctx: &ExtractContext<'_>) -> Result<ExtractedFields, ExtractError> {
        let task = ctx.task;
        let layout = layout(task.utility)
            .ok_or_else(|| ExtractError::UnsupportedUtility(task.utility.to_string()))?;
        let session = ctx.session;

        session
            .type_into(layout.account_input, &task.account)
            .await
            .map_err(element_missing)?;

        if layout.select_city {
            session.click(CITY_DROPDOWN).await.map_err(element_missing)?;
            session
                .type_into(CITY_SEARCH, task.city.as_deref().unwrap_or_default())
                .await
                .map_err(element_missing)?;
            session.click(CITY_OPTION).await.map_err(element_missing)?;
        }

        session.click(SEARCH_BUTTON).await.map_err(element_missing)?;

        for selector in NOT_FOUND_SELECTORS {
            if session.wait_for(selector, ctx.timeouts.not_found_probe).await? {
                tracing::info!(account = %task.account, url = ctx.url, "Account not found on portal");
                return Err(ExtractError::AccountNotFound(task.account.clone()));
            }
        }

        let results_timeout = layout.results_timeout.unwrap_or(ctx.timeouts.results);
        if !session.wait_for(layout.result_panel, results_timeout).await? {
            return Err(ExtractError::SelectorNotFound(layout.result_panel.to_string()));
        }

        let html = session.content().await?;
        let fields = parse_result_card(&html, &layout)?;
        tracing::info!(
            account = %task.account,
            utility = %task.utility,
            address = ?fields.address,
            debit_full = ?fields.debit_full,
            "Result card parsed"
        );
        Ok(fields)
    }
}

fn parse_result_card(html: &str, layout: &FormLayout) -> Result<ExtractedFields, ExtractError> {
    let document = Html::parse_document(html);
    let panel_sel = Selector::parse(layout.result_panel).expect("valid selector");
    let block_sel = Selector::parse(FIELD_BLOCK).expect("valid selector");
    let label_sel = Selector::parse(FIELD_LABEL).expect("valid selector");
    let value_sel = Selector::parse(FIELD_VALUE).expect("valid selector");

    let panel = document
        .select(&panel_sel)
        .next()
        .ok_or_else(|| ExtractError::SelectorNotFound(layout.result_panel.to_string()))?;
    if layout.hidden_until_loaded && panel.value().classes().any(|c| c == "hide") {
        return Err(ExtractError::SelectorNotFound(format!(
            "{} is hidden, no result shown",
            layout.result_panel
        )));
    }

    let mut fields = ExtractedFields::default();
    for block in document.select(&block_sel) {
        let Some(label) = block.select(&label_sel).next().map(text_of) else {
            continue;
        };
        let Some((_, field)) = layout.labels.iter().find(|(l, _)| *l == label) else {
            continue;
        };
        if let Some(value) = block.select(&value_sel).next().map(text_of) {
            field.set(&mut fields, value);
        }
    }
    Ok(fields)
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}
