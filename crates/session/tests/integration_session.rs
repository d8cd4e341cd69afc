//! Integrationstests der Sitzungs-Zustandsmaschine
//!
//! Simulierter Kanal, simulierte Medien-Quelle und simulierte Ausgabe-Senke
//! ersetzen Netzwerk und Audio-Hardware; der Ereignis-Loop laeuft echt.

use std::sync::Arc;
use std::time::Duration;

use mahi_audio::pcm::{base64_kodieren, f32_zu_pcm};
use mahi_audio::{AbspielPlaner, AusgabeSenke, SimulierteSenke};
use mahi_core::SessionStatus;
use mahi_session::{
    KanalEreignis, LiveSession, LiveSessionConfig, SimulierteMedienQuelle, SimulierterKanal,
};

struct TestAufbau {
    kanal: Arc<SimulierterKanal>,
    medien: Arc<SimulierteMedienQuelle>,
    senke: Arc<SimulierteSenke>,
    planer: Arc<AbspielPlaner>,
}

fn aufbau(config: LiveSessionConfig) -> (TestAufbau, LiveSession) {
    let kanal = Arc::new(SimulierterKanal::neu());
    let medien = Arc::new(SimulierteMedienQuelle::neu());
    let senke = Arc::new(SimulierteSenke::neu());
    let planer = Arc::new(AbspielPlaner::neu(
        Arc::clone(&senke) as Arc<dyn AusgabeSenke>
    ));

    let session = LiveSession::neu(
        Arc::clone(&kanal) as Arc<dyn mahi_session::DuplexKanal>,
        Arc::clone(&medien) as Arc<dyn mahi_session::MedienQuelle>,
        Arc::clone(&planer),
        config,
    );
    (
        TestAufbau {
            kanal,
            medien,
            senke,
            planer,
        },
        session,
    )
}

/// Base64-PCM-Chunk mit der gegebenen Dauer bei 24kHz
fn audio_chunk_ms(ms: u64) -> KanalEreignis {
    let samples = vec![0.1f32; (24_000 * ms / 1000) as usize];
    KanalEreignis::AudioChunk {
        base64: base64_kodieren(&f32_zu_pcm(&samples)),
    }
}

/// Pollt bis die Bedingung zutrifft oder die Frist ablaeuft
async fn warte_bis(beschreibung: &str, mut bedingung: impl FnMut() -> bool) {
    for _ in 0..200 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("Frist abgelaufen: {}", beschreibung);
}

#[tokio::test]
async fn stoppen_aus_standby_ist_noop() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());

    session.stoppen().await;

    assert_eq!(session.status(), SessionStatus::Standby);
    assert_eq!(umgebung.kanal.geoeffnet_anzahl(), 0);
}

#[tokio::test]
async fn verweigerte_medien_oeffnen_keinen_kanal() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    umgebung.medien.zugriff_verweigern();

    let result = session.starten().await;

    assert!(result.is_err());
    assert!(matches!(session.status(), SessionStatus::Fehler(_)));
    assert_eq!(umgebung.kanal.geoeffnet_anzahl(), 0, "kein Kanal geoeffnet");
}

#[tokio::test]
async fn kanal_fehler_beim_oeffnen_fuehrt_zu_fehler() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    umgebung.kanal.oeffnen_fehlschlagen();

    let result = session.starten().await;

    assert!(result.is_err());
    assert!(matches!(session.status(), SessionStatus::Fehler(_)));
    assert!(umgebung.medien.wurde_freigegeben(), "Medien wieder frei");
}

#[tokio::test]
async fn starten_fuehrt_nach_live() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());

    session.starten().await.unwrap();

    assert_eq!(session.status(), SessionStatus::Live);
    assert_eq!(umgebung.kanal.geoeffnet_anzahl(), 1);
    // Doppeltes Starten ist ein Zustands-Fehler
    assert!(session.starten().await.is_err());
}

#[tokio::test]
async fn audio_chunks_werden_ruecken_an_ruecken_geplant() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    session.starten().await.unwrap();

    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(100)).await;
    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(150)).await;

    let senke = Arc::clone(&umgebung.senke);
    warte_bis("zwei geplante Starts", move || senke.starts().len() == 2).await;

    let starts = umgebung.senke.starts();
    assert!((starts[0].1 - 0.0).abs() < 1e-9);
    assert!((starts[1].1 - 0.1).abs() < 1e-9, "lueckenlos hinter dem ersten");
}

#[tokio::test]
async fn unterbrechung_verwirft_und_neuer_zug_startet_sofort() {
    // Pipeline-Szenario: A(100ms), B(150ms), Unterbrechung, C(80ms)
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    session.starten().await.unwrap();

    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(100)).await;
    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(150)).await;
    let senke = Arc::clone(&umgebung.senke);
    warte_bis("A und B geplant", move || senke.starts().len() == 2).await;

    umgebung.senke.zeit_vorruecken(0.06);
    umgebung
        .kanal
        .ereignis_einspeisen(KanalEreignis::Unterbrochen)
        .await;
    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(80)).await;

    let senke = Arc::clone(&umgebung.senke);
    warte_bis("C geplant", move || senke.starts().len() == 3).await;

    let starts = umgebung.senke.starts();
    assert!(
        (starts[2].1 - 0.06).abs() < 1e-9,
        "C startet am Unterbrechungszeitpunkt, nicht bei 0.25"
    );
    assert_eq!(umgebung.senke.laufende_anzahl(), 1, "nur C laeuft noch");
}

#[tokio::test]
async fn ungueltiger_chunk_bleibt_chunk_lokal() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    session.starten().await.unwrap();

    umgebung
        .kanal
        .ereignis_einspeisen(KanalEreignis::AudioChunk {
            base64: "kein base64 !!!".into(),
        })
        .await;
    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(50)).await;

    let senke = Arc::clone(&umgebung.senke);
    warte_bis("gueltiger Chunk geplant", move || {
        senke.starts().len() == 1
    })
    .await;
    assert_eq!(session.status(), SessionStatus::Live, "Sitzung laeuft weiter");
}

#[tokio::test]
async fn zug_abschluss_aendert_zustand_nicht() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    session.starten().await.unwrap();

    umgebung
        .kanal
        .ereignis_einspeisen(KanalEreignis::ZugAbgeschlossen)
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(session.status(), SessionStatus::Live);
}

#[tokio::test]
async fn kanal_fehler_ereignis_ist_sitzungs_fatal() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    session.starten().await.unwrap();

    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(100)).await;
    umgebung
        .kanal
        .ereignis_einspeisen(KanalEreignis::Fehler("Verbindung abgerissen".into()))
        .await;

    let mut status = session.status_beobachten();
    warte_bis("Fehler-Zustand", move || {
        matches!(*status.borrow_and_update(), SessionStatus::Fehler(_))
    })
    .await;
    assert_eq!(umgebung.planer.ausstehend(), 0, "Wiedergabe verworfen");
}

#[tokio::test]
async fn kanal_schliessung_beendet_die_sitzung() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    session.starten().await.unwrap();

    umgebung
        .kanal
        .ereignis_einspeisen(KanalEreignis::Geschlossen)
        .await;

    let mut status = session.status_beobachten();
    warte_bis("Beendet-Zustand", move || {
        *status.borrow_and_update() == SessionStatus::Beendet
    })
    .await;
}

#[tokio::test]
async fn stoppen_ist_idempotent_und_raeumt_auf() {
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    session.starten().await.unwrap();

    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(200)).await;
    let senke = Arc::clone(&umgebung.senke);
    warte_bis("Chunk geplant", move || senke.starts().len() == 1).await;

    session.stoppen().await;

    assert_eq!(session.status(), SessionStatus::Beendet);
    assert!(umgebung.kanal.wurde_geschlossen());
    assert!(umgebung.medien.wurde_freigegeben());
    assert_eq!(umgebung.planer.ausstehend(), 0, "keine ausstehende Wiedergabe");

    // Zweites Stoppen aendert nichts
    session.stoppen().await;
    assert_eq!(session.status(), SessionStatus::Beendet);
}

#[tokio::test]
async fn stoppen_waehrend_des_verbindens_gewinnt() {
    // Stopp waehrend der Kanal-Handshake noch laeuft: der nachlaufende
    // Start darf die Sitzung nicht wieder nach Live heben
    let (umgebung, session) = aufbau(LiveSessionConfig::default());
    umgebung.kanal.oeffnen_verzoegern(Duration::from_millis(50));

    let session = Arc::new(session);
    let starter = Arc::clone(&session);
    let start = tokio::spawn(async move { starter.starten().await });

    let beobachter = Arc::clone(&session);
    warte_bis("Zustand Verbindet", move || {
        beobachter.status() == SessionStatus::Verbindet
    })
    .await;
    session.stoppen().await;
    assert_eq!(session.status(), SessionStatus::Beendet);

    let ergebnis = start.await.expect("Start-Task nicht abgestuerzt");
    assert!(ergebnis.is_err(), "nachlaufender Start schlaegt fehl");
    assert_eq!(session.status(), SessionStatus::Beendet, "bleibt beendet");
    assert!(
        umgebung.kanal.wurde_geschlossen(),
        "Handshake-Kanal wieder geschlossen"
    );
    assert!(umgebung.medien.wurde_freigegeben());
}

#[tokio::test]
async fn zuruecksetzen_nur_aus_terminalen_zustaenden() {
    let (_umgebung, session) = aufbau(LiveSessionConfig::default());

    assert!(session.zuruecksetzen().is_err(), "aus Standby nicht erlaubt");

    session.starten().await.unwrap();
    assert!(session.zuruecksetzen().is_err(), "aus Live nicht erlaubt");

    session.stoppen().await;
    session.zuruecksetzen().unwrap();
    assert_eq!(session.status(), SessionStatus::Standby);
}

#[tokio::test]
async fn aufnahme_exportiert_wav() {
    let config = LiveSessionConfig {
        aufnahme: true,
        ..LiveSessionConfig::default()
    };
    let (umgebung, session) = aufbau(config);
    session.starten().await.unwrap();

    assert!(session.aufnahme_als_wav().is_none(), "noch nichts empfangen");

    umgebung.kanal.ereignis_einspeisen(audio_chunk_ms(100)).await;
    let senke = Arc::clone(&umgebung.senke);
    warte_bis("Chunk geplant", move || senke.starts().len() == 1).await;
    session.stoppen().await;

    let wav = session.aufnahme_als_wav().expect("Mitschnitt vorhanden");
    // 100ms bei 24kHz, 16 bit mono = 4800 Bytes Nutzlast
    assert_eq!(wav.len(), 44 + 4_800);
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");
    assert_eq!(
        u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]),
        4_800
    );
}
