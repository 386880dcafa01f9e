/*!
Sorties iperf3 réalistes pour les tests

Formes couvertes : rapport JSON TCP (sum_sent/sum_received), rapport JSON UDP
(sum seul), rapport d'erreur JSON et lignes de résumé texte.
*/

use serde_json::json;

/// TCP report of `iperf3 -J`, receiver side at `bits_per_second`
pub fn iperf_tcp_json(bits_per_second: f64) -> String {
    json!({
        "start": {
            "connected": [{"socket": 5, "local_host": "10.1.1.10", "remote_host": "10.4.1.10", "remote_port": 5201}],
            "test_start": {"protocol": "TCP", "num_streams": 1, "duration": 30}
        },
        "intervals": [],
        "end": {
            "streams": [{
                "sender": {"bits_per_second": bits_per_second * 1.01},
                "receiver": {"bits_per_second": bits_per_second}
            }],
            "sum_sent": {"seconds": 30.0, "bytes": 0, "bits_per_second": bits_per_second * 1.01, "retransmits": 0},
            "sum_received": {"seconds": 30.0, "bytes": 0, "bits_per_second": bits_per_second}
        }
    })
    .to_string()
}

/// UDP report: only `end.sum` carries the rate
pub fn iperf_udp_json(bits_per_second: f64) -> String {
    json!({
        "start": {"test_start": {"protocol": "UDP", "num_streams": 1, "blksize": 1448}},
        "end": {
            "sum": {
                "seconds": 30.0,
                "bits_per_second": bits_per_second,
                "jitter_ms": 0.02,
                "lost_packets": 0,
                "packets": 25000,
                "lost_percent": 0.0
            }
        }
    })
    .to_string()
}

/// What `iperf3 -J` prints when the listener is unreachable
pub fn iperf_error_json() -> String {
    json!({
        "start": {"connected": []},
        "intervals": [],
        "end": {},
        "error": "error - unable to connect to server: Connection refused"
    })
    .to_string()
}

/// Human-readable summary (no `-J`), ex: `iperf_text("5.00", "Gbits", "sender")`
pub fn iperf_text(value: &str, unit: &str, role: &str) -> String {
    format!(
        "Connecting to host 10.4.1.10, port 5201\n\
         [  5] local 10.1.1.10 port 40122 connected to 10.4.1.10 port 5201\n\
         [ ID] Interval           Transfer     Bitrate\n\
         [  5]   0.00-30.00  sec  1.00 GBytes  {value} {unit}/sec                  {role}\n\
         \n\
         iperf Done.\n"
    )
}
