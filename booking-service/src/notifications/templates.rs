use super::{EmailMessage, NotificationJob, NotificationKind};
use crate::models::{Booking, Listing, Payment};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("template field '{0}' missing")]
pub struct MissingField(pub &'static str);

/// Fields the booking-created email needs.
pub fn booking_created_fields(booking: &Booking, listing: &Listing) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("booking_id".to_string(), booking.id.to_string()),
        ("guest_name".to_string(), booking.guest_name.clone()),
        ("listing_title".to_string(), listing.title.clone()),
        ("listing_location".to_string(), listing.location.clone()),
        ("check_in".to_string(), booking.check_in_date.to_string()),
        ("check_out".to_string(), booking.check_out_date.to_string()),
        ("num_guests".to_string(), booking.num_guests.to_string()),
        ("total_price".to_string(), booking.total_price.to_string()),
        ("status".to_string(), booking.status.as_str().to_string()),
        ("status_label".to_string(), booking.status.label().to_string()),
    ])
}

/// Fields the payment-confirmed email needs.
pub fn payment_confirmed_fields(
    payment: &Payment,
    booking: &Booking,
    listing_title: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("guest_name".to_string(), booking.guest_name.clone()),
        ("listing_title".to_string(), listing_title.to_string()),
        ("check_in".to_string(), booking.check_in_date.to_string()),
        ("check_out".to_string(), booking.check_out_date.to_string()),
        ("amount".to_string(), payment.amount.to_string()),
        ("currency".to_string(), payment.currency.clone()),
        ("transaction_ref".to_string(), payment.transaction_ref.clone()),
    ])
}

struct Fields<'a>(&'a BTreeMap<String, String>);

impl<'a> Fields<'a> {
    fn get(&self, key: &'static str) -> Result<&'a str, MissingField> {
        self.0.get(key).map(String::as_str).ok_or(MissingField(key))
    }
}

pub fn render(job: &NotificationJob) -> Result<EmailMessage, MissingField> {
    let fields = Fields(&job.template_fields);
    let (subject, body_text) = match job.kind {
        NotificationKind::BookingCreated => {
            let listing = fields.get("listing_title")?;
            let subject = format!("Booking Confirmation - {}", listing);
            let body = format!(
                "Dear {guest},\n\n\
                 Thank you for your booking! Your reservation has been successfully created.\n\n\
                 Booking Details:\n\
                 - Booking ID: #{id}\n\
                 - Listing: {listing}\n\
                 - Location: {location}\n\
                 - Check-in Date: {check_in}\n\
                 - Check-out Date: {check_out}\n\
                 - Number of Guests: {guests}\n\
                 - Total Price: {price}\n\
                 - Status: {label}\n\n\
                 What's Next?\n\
                 - Your booking is currently {status}\n\
                 - You will receive payment instructions shortly\n\
                 - Once payment is completed, your booking will be confirmed\n\n\
                 If you have any questions, please don't hesitate to contact us.\n\n\
                 Best regards,\n\
                 The Travel Team\n",
                guest = fields.get("guest_name")?,
                id = fields.get("booking_id")?,
                listing = listing,
                location = fields.get("listing_location")?,
                check_in = fields.get("check_in")?,
                check_out = fields.get("check_out")?,
                guests = fields.get("num_guests")?,
                price = fields.get("total_price")?,
                label = fields.get("status_label")?,
                status = fields.get("status")?,
            );
            (subject, body)
        }
        NotificationKind::PaymentConfirmed => {
            let body = format!(
                "Dear {guest},\n\n\
                 This is a confirmation that your payment for the booking of \"{listing}\" \
                 has been successfully processed.\n\n\
                 Booking Details:\n\
                 - Check-in: {check_in}\n\
                 - Check-out: {check_out}\n\
                 - Total Amount: {amount} {currency}\n\
                 - Transaction ID: {tx_ref}\n\n\
                 Thank you for travelling with us.\n\n\
                 Best regards,\n\
                 The Travel Team\n",
                guest = fields.get("guest_name")?,
                listing = fields.get("listing_title")?,
                check_in = fields.get("check_in")?,
                check_out = fields.get("check_out")?,
                amount = fields.get("amount")?,
                currency = fields.get("currency")?,
                tx_ref = fields.get("transaction_ref")?,
            );
            ("Payment Confirmation for your Booking".to_string(), body)
        }
    };

    Ok(EmailMessage {
        to: job.recipient_email.clone(),
        subject,
        body_text,
    })
}
