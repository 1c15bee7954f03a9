mod common;

use assert_matches::assert_matches;
use common::TestDepot;
use container_depot::{
    entities::invoice::InvoiceStatus,
    events::Event,
    services::invoicing::{CreateInvoiceInput, LineInput},
    ServiceError,
};
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn line(code: &str, quantity: Decimal, unit_price: Decimal, tax_rate: Option<Decimal>) -> LineInput {
    LineInput {
        line_code: code.to_string(),
        description: format!("{code} charge"),
        reference: None,
        quantity,
        unit_price,
        tax_rate,
    }
}

fn storage_invoice(request_id: Option<Uuid>, lines: Vec<LineInput>) -> CreateInvoiceInput {
    CreateInvoiceInput {
        source_module: "STORAGE".to_string(),
        source_id: Uuid::new_v4(),
        request_id,
        currency: None,
        lines,
    }
}

#[tokio::test]
async fn created_invoice_carries_rounded_totals() {
    let depot = TestDepot::new().await;
    let created = depot
        .services
        .invoicing
        .create_invoice(
            storage_invoice(
                None,
                vec![
                    line("LIFT", dec!(1), dec!(0.335), Some(dec!(0.1))),
                    line("STORAGE", dec!(2), dec!(0.34), Some(dec!(0.1))),
                ],
            ),
            &depot.clerk(),
        )
        .await
        .unwrap();

    let invoice = &created.invoice;
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert!(invoice.invoice_no.starts_with("INV-"));
    assert_eq!(invoice.currency, "VND");
    assert_eq!(created.lines.len(), 2);
    assert_eq!(invoice.subtotal.round_dp(2), dec!(1.02));
    assert_eq!(invoice.tax_amount.round_dp(2), dec!(0.10));
    assert_eq!(invoice.total_amount.round_dp(2), dec!(1.12));
}

#[tokio::test]
async fn one_invoice_per_source() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let input = storage_invoice(None, vec![]);
    depot
        .services
        .invoicing
        .create_invoice(input.clone(), &actor)
        .await
        .unwrap();

    let err = depot
        .services
        .invoicing
        .create_invoice(input, &actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn line_edits_refresh_totals() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let invoicing = &depot.services.invoicing;
    let created = invoicing
        .create_invoice(storage_invoice(None, vec![]), &actor)
        .await
        .unwrap();
    let id = created.invoice.id;
    assert_eq!(created.invoice.total_amount.round_dp(2), Decimal::ZERO);

    let with_line = invoicing
        .add_line(id, line("WASH", dec!(1), dec!(100000), Some(dec!(0.08))), &actor)
        .await
        .unwrap();
    assert_eq!(with_line.invoice.total_amount.round_dp(2), dec!(108000));
    let line_id = with_line.lines[0].id;

    let updated = invoicing
        .update_line(line_id, line("WASH", dec!(3), dec!(100000), None), &actor)
        .await
        .unwrap();
    assert_eq!(updated.invoice.subtotal.round_dp(2), dec!(300000));
    assert_eq!(updated.invoice.tax_amount.round_dp(2), Decimal::ZERO);

    let emptied = invoicing.remove_line(line_id, &actor).await.unwrap();
    assert!(emptied.lines.is_empty());
    assert_eq!(emptied.invoice.total_amount.round_dp(2), Decimal::ZERO);

    let recomputed = invoicing.recompute_totals(id).await.unwrap();
    assert_eq!(recomputed.total_amount.round_dp(2), Decimal::ZERO);

    let events = depot.events().await;
    let recomputes = events
        .iter()
        .filter(|e| matches!(e, Event::InvoiceRecomputed { invoice_id, .. } if *invoice_id == id))
        .count();
    assert!(recomputes >= 5);
}

#[rstest]
#[case::zero_quantity(line("X", dec!(0), dec!(1), None))]
#[case::negative_price(line("X", dec!(1), dec!(-1), None))]
#[case::rate_above_one(line("X", dec!(1), dec!(1), Some(dec!(1.5))))]
#[case::empty_code(line("", dec!(1), dec!(1), None))]
#[case::overflowing_amount(line("X", dec!(10000000000000000), dec!(10000000000000000), None))]
#[tokio::test]
async fn malformed_lines_are_refused(#[case] bad: LineInput) {
    let depot = TestDepot::new().await;
    let created = depot
        .services
        .invoicing
        .create_invoice(storage_invoice(None, vec![]), &depot.clerk())
        .await
        .unwrap();

    let err = depot
        .services
        .invoicing
        .add_line(created.invoice.id, bad, &depot.clerk())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn paying_flags_the_request() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let request = depot.create_import("MSCU1234567").await;

    let created = depot
        .services
        .invoicing
        .create_invoice(
            storage_invoice(
                Some(request.id),
                vec![line("STORAGE", dec!(5), dec!(20000), None)],
            ),
            &actor,
        )
        .await
        .unwrap();
    let flagged = depot.services.requests.get_request(request.id, &actor).await.unwrap();
    assert!(flagged.has_invoice);
    assert!(!flagged.is_paid);

    let paid = depot
        .services
        .invoicing
        .mark_paid(created.invoice.id, &actor)
        .await
        .unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert!(paid.paid_at.is_some());
    assert_eq!(paid.total_amount.round_dp(2), dec!(100000));

    let flagged = depot.services.requests.get_request(request.id, &actor).await.unwrap();
    assert!(flagged.is_paid);
}

#[tokio::test]
async fn paid_invoices_are_frozen() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let invoicing = &depot.services.invoicing;
    let created = invoicing
        .create_invoice(
            storage_invoice(None, vec![line("LIFT", dec!(1), dec!(50000), None)]),
            &actor,
        )
        .await
        .unwrap();
    let id = created.invoice.id;
    let line_id = created.lines[0].id;
    invoicing.mark_paid(id, &actor).await.unwrap();

    let err = invoicing
        .add_line(id, line("LIFT", dec!(1), dec!(1), None), &actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });
    let err = invoicing
        .update_line(line_id, line("LIFT", dec!(2), dec!(1), None), &actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });
    let err = invoicing.remove_line(line_id, &actor).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });
    let err = invoicing.mark_paid(id, &actor).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });

    let unchanged = invoicing.get_invoice(id).await.unwrap();
    assert_eq!(unchanged.lines.len(), 1);
    assert_eq!(unchanged.invoice.total_amount.round_dp(2), dec!(50000));
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let depot = TestDepot::new().await;
    let err = depot
        .services
        .invoicing
        .recompute_totals(Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
    let err = depot
        .services
        .invoicing
        .remove_line(Uuid::new_v4(), &depot.clerk())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
