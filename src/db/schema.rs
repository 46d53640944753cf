use rusqlite::Connection;

/// Initialize the database schema.
///
/// The ledger is append-only by convention: nothing in the engine issues
/// UPDATEs against `ledger_entries.amount_minor`, only status/reservation
/// transitions.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Profiles (identity collaborator - the engine reads referral codes
        -- and uses the id as a ledger party identifier)
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            referral_code TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_profiles_referral_code ON profiles(referral_code);

        -- Listings (marketplace collaborator - read at booking creation only;
        -- bookings freeze their own price/terms snapshot)
        CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL REFERENCES profiles(id),
            title TEXT NOT NULL,
            price_minor INTEGER NOT NULL CHECK (price_minor > 0),
            currency TEXT NOT NULL,
            terms TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_listings_provider ON listings(provider_id);

        -- Referral attributions (immutable - first bind wins, never updated,
        -- never deleted; subject_id PRIMARY KEY enforces at-most-one)
        CREATE TABLE IF NOT EXISTS referral_attributions (
            subject_id TEXT PRIMARY KEY REFERENCES profiles(id),
            referrer_id TEXT NOT NULL REFERENCES profiles(id),
            source TEXT NOT NULL CHECK (source IN ('code', 'cookie', 'manual')),
            custom_rate_bp INTEGER,
            bound_at INTEGER NOT NULL,
            CHECK (subject_id <> referrer_id)
        );
        CREATE INDEX IF NOT EXISTS idx_attributions_referrer ON referral_attributions(referrer_id);

        -- Bookings (soft terminal states only, never hard-deleted)
        -- price_minor/currency/terms_snapshot/referrer_id are frozen at creation
        CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL REFERENCES profiles(id),
            customer_id TEXT NOT NULL REFERENCES profiles(id),
            listing_id TEXT NOT NULL REFERENCES listings(id),
            starts_at INTEGER NOT NULL,
            ends_at INTEGER NOT NULL,
            price_minor INTEGER NOT NULL,
            currency TEXT NOT NULL,
            terms_snapshot TEXT,
            referrer_id TEXT,
            status TEXT NOT NULL CHECK (status IN (
                'pending', 'confirmed', 'completed', 'cancelled',
                'disputed', 'refunded', 'resolved'
            )),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (ends_at > starts_at)
        );
        CREATE INDEX IF NOT EXISTS idx_bookings_provider_interval ON bookings(provider_id, starts_at, ends_at);
        CREATE INDEX IF NOT EXISTS idx_bookings_customer ON bookings(customer_id);
        CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings(status);

        -- Processed payment events (idempotency log - external_event_id UNIQUE
        -- makes INSERT OR IGNORE the replay check)
        CREATE TABLE IF NOT EXISTS payment_events (
            id TEXT PRIMARY KEY,
            external_event_id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            booking_id TEXT REFERENCES bookings(id),
            payout_id TEXT,
            gross_minor INTEGER NOT NULL,
            processed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payment_events_booking ON payment_events(booking_id, kind);

        -- Payouts (withdrawal requests awaiting processor reconciliation)
        CREATE TABLE IF NOT EXISTS payouts (
            id TEXT PRIMARY KEY,
            party_id TEXT NOT NULL REFERENCES profiles(id),
            amount_minor INTEGER NOT NULL CHECK (amount_minor > 0),
            status TEXT NOT NULL CHECK (status IN ('requested', 'paid_out', 'failed')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payouts_party ON payouts(party_id);

        -- Ledger entries (append-only; amounts never change after insert)
        -- payout_id marks an entry reserved for a withdrawal
        CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT PRIMARY KEY,
            payment_event_id TEXT NOT NULL REFERENCES payment_events(id),
            booking_id TEXT NOT NULL REFERENCES bookings(id),
            party_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('recipient', 'referrer', 'platform')),
            amount_minor INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN (
                'pending_clearing', 'available', 'paid_out', 'reversed'
            )),
            available_at INTEGER NOT NULL,
            payout_id TEXT REFERENCES payouts(id),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ledger_party_status ON ledger_entries(party_id, status);
        CREATE INDEX IF NOT EXISTS idx_ledger_sweep ON ledger_entries(status, available_at);
        CREATE INDEX IF NOT EXISTS idx_ledger_event ON ledger_entries(payment_event_id);
        CREATE INDEX IF NOT EXISTS idx_ledger_booking ON ledger_entries(booking_id);
        CREATE INDEX IF NOT EXISTS idx_ledger_payout ON ledger_entries(payout_id) WHERE payout_id IS NOT NULL;

        -- Dead-letter store (failed events held for replay; acknowledging the
        -- source while keeping the raw payload stops redelivery storms)
        CREATE TABLE IF NOT EXISTS dead_letter_events (
            id TEXT PRIMARY KEY,
            external_event_id TEXT,
            payload TEXT NOT NULL,
            error TEXT NOT NULL,
            severity TEXT NOT NULL CHECK (severity IN ('transient', 'fatal')),
            attempts INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            replayed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_dead_letters_unreplayed ON dead_letter_events(created_at) WHERE replayed_at IS NULL;
        "#,
    )?;
    Ok(())
}
